//! Minimal deferred value: a handle that settles once and notifies observers.
//!
//! Used for three things: listeners that finish later return one, `publish`
//! returns one, and async callers can `.await` one. Clones share state.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use serde_json::Value;

use crate::error::{EmitResult, HubError};

type SettleCallback = Box<dyn FnOnce(EmitResult)>;

#[derive(Default)]
struct DeferredState {
    outcome: Option<EmitResult>,
    callbacks: Vec<SettleCallback>,
    wakers: Vec<Waker>,
}

/// A value that becomes available later
#[derive(Clone, Default)]
pub struct Deferred {
    state: Rc<RefCell<DeferredState>>,
}

impl Deferred {
    /// Create a pending handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle already resolved with `value`
    pub fn resolved(value: Option<Value>) -> Self {
        let deferred = Self::new();
        deferred.resolve(value);
        deferred
    }

    /// Create a handle already rejected with `error`
    pub fn rejected(error: impl Into<HubError>) -> Self {
        let deferred = Self::new();
        deferred.reject(error);
        deferred
    }

    /// Resolve with a value. Returns false if already settled.
    pub fn resolve(&self, value: Option<Value>) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with an error. Returns false if already settled.
    pub fn reject(&self, error: impl Into<HubError>) -> bool {
        self.settle(Err(error.into()))
    }

    /// Settle with a result. Returns false if already settled.
    ///
    /// Observers run after the internal borrow is released, so they may
    /// touch this handle again.
    pub fn settle(&self, result: EmitResult) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.state.borrow_mut();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(result.clone());
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
            )
        };

        for callback in callbacks {
            callback(result.clone());
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Whether the handle has not settled yet
    pub fn is_pending(&self) -> bool {
        self.state.borrow().outcome.is_none()
    }

    /// The outcome, if settled
    pub fn result(&self) -> Option<EmitResult> {
        self.state.borrow().outcome.clone()
    }

    /// Run `callback` once the handle settles (immediately if it already has)
    pub fn on_settle<F>(&self, callback: F)
    where
        F: FnOnce(EmitResult) + 'static,
    {
        let settled = self.result();
        match settled {
            Some(result) => callback(result),
            None => self.state.borrow_mut().callbacks.push(Box::new(callback)),
        }
    }

    /// Await the outcome, failing with [`HubError::Timeout`] after `timeout`.
    ///
    /// Requires a tokio runtime with timers enabled.
    pub async fn wait_timeout(self, timeout: Duration) -> EmitResult {
        match tokio::time::timeout(timeout, self).await {
            Ok(result) => result,
            Err(_) => Err(HubError::Timeout(timeout)),
        }
    }
}

impl Future for Deferred {
    type Output = EmitResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        if let Some(result) = &state.outcome {
            return Poll::Ready(result.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Deferred")
            .field("outcome", &state.outcome)
            .field("observers", &state.callbacks.len())
            .finish()
    }
}
