//! Dispatch engine shared by `publish` and `emit`.
//!
//! One emission is a [`Dispatch`]: a snapshot of the matched filters followed
//! by the matched listeners, walked by a cursor. Filters always run as a
//! chain, each one suspending delivery until it calls its [`Next`]. What
//! happens at a listener depends on the [`Mode`]:
//!
//! - `Chain` (`publish`): a listener that finishes later suspends the walk
//!   until it settles, so listeners run strictly one after another.
//! - `Emit` (`emit`, `emit_with`): every listener is started without waiting;
//!   late finishers are collected before the result is produced.
//!
//! All bookkeeping sits in cells behind an `Rc`, which lets continuations
//! ([`Completion`], [`Next`], [`Delivery::propagate`]) resume the walk from
//! inside a callback or long after `emit` returned. No hub borrow is held while
//! callbacks run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::aggregate::{Aggregator, Slot, Strategy};
use crate::deferred::Deferred;
use crate::error::{EmitResult, ListenerError};
use crate::hub::{Hub, HubInner};
use crate::listener::{Filter, Listener, ListenerFn, ListenerResult};
use crate::registry::Subscription;
use crate::topic::Topic;

/// Sequencing mode of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Listeners run one after another, waiting on late finishers
    Chain,
    /// Listeners all start, late finishers are awaited together
    Emit,
}

pub(crate) enum Step {
    Filter(Rc<Subscription<Filter>>),
    Listener(Rc<Subscription<Listener>>),
}

impl Step {
    fn pattern(&self) -> &str {
        match self {
            Self::Filter(sub) => sub.pattern(),
            Self::Listener(sub) => sub.pattern(),
        }
    }
}

/// In-flight state of one emission
pub(crate) struct Dispatch {
    hub: Weak<HubInner>,
    topic: Topic,
    mode: Mode,
    strategy: Strategy,
    steps: Vec<Step>,
    args: RefCell<Vec<Value>>,
    /// Next step to visit
    cursor: Cell<usize>,
    /// Callback frames of this dispatch currently on the stack
    calls: Cell<usize>,
    /// Walk loops of this dispatch currently on the stack
    loops: Cell<usize>,
    /// Step whose continuation the walk is suspended on
    awaiting: Cell<Option<usize>>,
    /// Callback listeners whose function is still on the stack
    running: RefCell<Vec<usize>>,
    stopped: Cell<bool>,
    replacement: RefCell<Option<Value>>,
    aggregator: RefCell<Aggregator>,
    outcome: Deferred,
}

impl Dispatch {
    pub(crate) fn new(
        hub: Weak<HubInner>,
        topic: Topic,
        mode: Mode,
        strategy: Strategy,
        steps: Vec<Step>,
        args: Vec<Value>,
    ) -> Rc<Self> {
        Rc::new(Self {
            hub,
            topic,
            mode,
            strategy,
            steps,
            args: RefCell::new(args),
            cursor: Cell::new(0),
            calls: Cell::new(0),
            loops: Cell::new(0),
            awaiting: Cell::new(None),
            running: RefCell::new(Vec::new()),
            stopped: Cell::new(false),
            replacement: RefCell::new(None),
            aggregator: RefCell::new(Aggregator::new()),
            outcome: Deferred::new(),
        })
    }

    /// Handle settled with the final result
    pub(crate) fn outcome(&self) -> &Deferred {
        &self.outcome
    }

    /// Result from what has settled so far; pending listeners read as no value
    pub(crate) fn partial(&self) -> EmitResult {
        self.aggregator
            .borrow()
            .finish(&self.strategy, self.replacement.borrow().clone())
    }

    /// Number of listener errors collected so far
    pub(crate) fn error_count(&self) -> usize {
        self.aggregator.borrow().errors().len()
    }

    pub(crate) fn start(self: &Rc<Self>) {
        tracing::debug!(
            topic = %self.topic,
            mode = ?self.mode,
            steps = self.steps.len(),
            "dispatch started"
        );
        self.run();
    }

    /// Walk steps until the end, a stop, or a suspension
    fn run(self: &Rc<Self>) {
        self.loops.set(self.loops.get() + 1);
        loop {
            if self.stopped.get() || self.awaiting.get().is_some() {
                break;
            }
            let index = self.cursor.get();
            let Some(step) = self.steps.get(index) else {
                break;
            };
            self.cursor.set(index + 1);
            match step {
                Step::Filter(sub) => self.invoke_filter(index, sub),
                Step::Listener(sub) => self.invoke_listener(index, sub),
            }
        }
        self.loops.set(self.loops.get() - 1);
        self.try_finish();
    }

    /// Continue after a continuation fired, unless a walk is already active
    fn resume(self: &Rc<Self>) {
        if self.loops.get() == 0 {
            self.run();
        }
    }

    fn release_step(&self, step: usize) -> bool {
        if self.awaiting.get() == Some(step) {
            self.awaiting.set(None);
            true
        } else {
            false
        }
    }

    fn enter(&self) {
        self.calls.set(self.calls.get() + 1);
    }

    fn leave(&self) {
        self.calls.set(self.calls.get() - 1);
    }

    fn invoke_filter(self: &Rc<Self>, index: usize, sub: &Rc<Subscription<Filter>>) {
        if !sub.claim() {
            return;
        }
        tracing::trace!(
            topic = %self.topic,
            pattern = sub.pattern(),
            filter = sub.label(),
            "invoking filter"
        );

        self.awaiting.set(Some(index));
        let next = Next::new(self.clone(), index);
        let mut delivery = Delivery::new(self.clone(), index);
        self.enter();
        let result = sub.callback().call(&mut delivery, next);
        self.leave();

        match result {
            Ok(()) => self.retire_filter(sub),
            Err(error) => {
                sub.release();
                tracing::warn!(
                    topic = %self.topic,
                    pattern = sub.pattern(),
                    filter = sub.label(),
                    error = %error,
                    "filter failed"
                );
                self.aggregator.borrow_mut().fail(index, error);
                if self.release_step(index) {
                    self.stopped.set(true);
                }
            }
        }
    }

    fn invoke_listener(self: &Rc<Self>, index: usize, sub: &Rc<Subscription<Listener>>) {
        if !sub.claim() {
            return;
        }
        tracing::trace!(
            topic = %self.topic,
            pattern = sub.pattern(),
            listener = sub.label(),
            kind = ?sub.callback().kind(),
            "invoking listener"
        );

        let slot = self.aggregator.borrow_mut().open();
        let mut delivery = Delivery::new(self.clone(), index);

        match sub.callback().function() {
            ListenerFn::Sync(f) => {
                self.enter();
                let result = f(&mut delivery);
                self.leave();
                self.complete(index, slot, result);
            }
            ListenerFn::Callback(f) => {
                if self.mode == Mode::Chain {
                    self.awaiting.set(Some(index));
                }
                let completion = Completion::new(self.clone(), index, slot);
                self.running.borrow_mut().push(index);
                self.enter();
                let result = f(&mut delivery, completion);
                self.leave();
                self.running.borrow_mut().retain(|&step| step != index);

                // An error returned after completing replaces the value
                let failed = match result {
                    Ok(()) => false,
                    Err(error) => self.aggregator.borrow_mut().fail_slot(slot, error),
                };
                self.finish_listener(index, slot);
                if failed {
                    self.release_step(index);
                    self.resume();
                }
            }
            ListenerFn::Deferred(f) => {
                if self.mode == Mode::Chain {
                    self.awaiting.set(Some(index));
                }
                self.enter();
                let result = f(&mut delivery);
                self.leave();
                match result {
                    Ok(handle) => {
                        let this = self.clone();
                        handle.on_settle(move |settled| {
                            this.complete(index, slot, settled.map_err(ListenerError::from))
                        });
                    }
                    Err(error) => self.complete(index, slot, Err(error)),
                }
            }
        }
    }

    /// Settle a listener slot and move on
    fn complete(self: &Rc<Self>, step: usize, slot: usize, result: ListenerResult) {
        if !self.aggregator.borrow_mut().settle(slot, result) {
            tracing::trace!(topic = %self.topic, slot, "ignoring repeated completion");
            return;
        }

        // A callback still running may yet return an error
        if !self.running.borrow().contains(&step) {
            self.finish_listener(step, slot);
        }

        self.release_step(step);
        self.resume();
    }

    /// Retire or re-arm a listener from the final state of its slot
    fn finish_listener(&self, step: usize, slot: usize) {
        let Some(Step::Listener(sub)) = self.steps.get(step) else {
            return;
        };
        let failure = match self.aggregator.borrow().slots().get(slot) {
            Some(Slot::Failed(error)) => Some(error.clone()),
            Some(Slot::Value(_)) => None,
            Some(Slot::Pending) | None => return,
        };
        match failure {
            Some(error) => self.report_failure(sub, &error),
            None => self.retire_listener(sub),
        }
    }

    fn report_failure(&self, sub: &Subscription<Listener>, error: &ListenerError) {
        sub.release();
        tracing::warn!(
            topic = %self.topic,
            pattern = sub.pattern(),
            listener = sub.label(),
            error = %error,
            "listener failed"
        );
    }

    fn retire_listener(&self, sub: &Subscription<Listener>) {
        if !sub.is_once() {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.registry.borrow_mut().listeners.retire(sub);
        }
    }

    fn retire_filter(&self, sub: &Subscription<Filter>) {
        if !sub.is_once() {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.registry.borrow_mut().filters.retire(sub);
        }
    }

    fn try_finish(&self) {
        if !self.outcome.is_pending() || self.calls.get() > 0 || self.awaiting.get().is_some() {
            return;
        }
        if !self.stopped.get() && self.cursor.get() < self.steps.len() {
            return;
        }

        let result = {
            let aggregator = self.aggregator.borrow();
            if aggregator.pending() > 0 {
                return;
            }
            aggregator.finish(&self.strategy, self.replacement.borrow_mut().take())
        };

        match &result {
            Ok(_) => tracing::debug!(
                topic = %self.topic,
                stopped = self.stopped.get(),
                "dispatch resolved"
            ),
            Err(error) => tracing::debug!(
                topic = %self.topic,
                category = error.category(),
                errors = error.listener_errors().len(),
                "dispatch rejected"
            ),
        }
        self.outcome.settle(result);
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("topic", &self.topic.as_str())
            .field("mode", &self.mode)
            .field("steps", &self.steps.len())
            .field("cursor", &self.cursor.get())
            .field("awaiting", &self.awaiting.get())
            .field("stopped", &self.stopped.get())
            .finish()
    }
}

/// What a listener or filter sees of the emission it is part of
pub struct Delivery {
    dispatch: Rc<Dispatch>,
    step: usize,
}

impl Delivery {
    fn new(dispatch: Rc<Dispatch>, step: usize) -> Self {
        Self { dispatch, step }
    }

    /// The emitted topic
    pub fn topic(&self) -> &str {
        self.dispatch.topic.as_str()
    }

    /// The pattern this callback was registered under
    pub fn pattern(&self) -> &str {
        self.dispatch
            .steps
            .get(self.step)
            .map(Step::pattern)
            .unwrap_or_default()
    }

    /// Copy of the current arguments
    pub fn args(&self) -> Vec<Value> {
        self.dispatch.args.borrow().clone()
    }

    /// One argument by position
    pub fn arg(&self, index: usize) -> Option<Value> {
        self.dispatch.args.borrow().get(index).cloned()
    }

    /// Replace the arguments seen by every later callback
    pub fn set_args(&mut self, args: Vec<Value>) {
        *self.dispatch.args.borrow_mut() = args;
    }

    /// Edit the arguments in place
    pub fn update_args<F>(&mut self, update: F)
    where
        F: FnOnce(&mut Vec<Value>),
    {
        update(&mut self.dispatch.args.borrow_mut());
    }

    /// Skip every callback that has not started yet.
    ///
    /// Values and errors of callbacks that already ran still count.
    pub fn stop_propagation(&mut self) {
        tracing::trace!(topic = %self.dispatch.topic, step = self.step, "propagation stopped");
        self.dispatch.stopped.set(true);
    }

    /// Stop propagation and make `value` the emission result
    pub fn stop_with(&mut self, value: Value) {
        *self.dispatch.replacement.borrow_mut() = Some(value);
        self.stop_propagation();
    }

    /// Whether propagation was stopped
    pub fn is_stopped(&self) -> bool {
        self.dispatch.stopped.get()
    }

    /// Run the rest of the chain now, before this callback continues.
    ///
    /// Also releases the chain if it was waiting on this callback.
    pub fn propagate(&mut self) {
        self.dispatch.release_step(self.step);
        self.dispatch.run();
    }

    /// The hub that started this emission, if it is still alive
    pub fn hub(&self) -> Option<Hub> {
        self.dispatch.hub.upgrade().map(Hub::from_inner)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic())
            .field("pattern", &self.pattern())
            .field("step", &self.step)
            .finish()
    }
}

/// Completion handle injected into callback listeners.
///
/// Exactly one outcome counts. Dropping the handle without completing counts
/// as completing with no value.
pub struct Completion {
    dispatch: Rc<Dispatch>,
    step: usize,
    slot: usize,
    done: bool,
}

impl Completion {
    fn new(dispatch: Rc<Dispatch>, step: usize, slot: usize) -> Self {
        Self {
            dispatch,
            step,
            slot,
            done: false,
        }
    }

    /// Finish with a listener result
    pub fn complete(mut self, result: ListenerResult) {
        self.done = true;
        self.dispatch.complete(self.step, self.slot, result);
    }

    /// Finish with a value (or none)
    pub fn resolve(self, value: Option<Value>) {
        self.complete(Ok(value));
    }

    /// Finish with an error
    pub fn reject(self, error: impl Into<ListenerError>) {
        self.complete(Err(error.into()));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.done {
            self.dispatch.complete(self.step, self.slot, Ok(None));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("topic", &self.dispatch.topic.as_str())
            .field("slot", &self.slot)
            .finish()
    }
}

/// Continuation handed to a filter
pub struct Next {
    dispatch: Rc<Dispatch>,
    step: usize,
    called: bool,
}

impl Next {
    fn new(dispatch: Rc<Dispatch>, step: usize) -> Self {
        Self {
            dispatch,
            step,
            called: false,
        }
    }

    /// Run the remaining filters and the listeners
    pub fn call(mut self) {
        self.called = true;
        self.dispatch.release_step(self.step);
        self.dispatch.run();
    }
}

impl Drop for Next {
    fn drop(&mut self) {
        if self.called {
            return;
        }
        if self.dispatch.release_step(self.step) {
            tracing::trace!(topic = %self.dispatch.topic, step = self.step, "filter ended delivery");
            self.dispatch.stopped.set(true);
            self.dispatch.resume();
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("topic", &self.dispatch.topic.as_str())
            .field("step", &self.step)
            .finish()
    }
}
