//! Listener and filter callbacks.
//!
//! A listener declares how it finishes when it is created instead of having
//! its shape inspected at dispatch time:
//!
//! | constructor                  | finishes by                          |
//! |------------------------------|--------------------------------------|
//! | [`Listener::new`]            | returning a value or an error        |
//! | [`Listener::with_callback`]  | calling the injected [`Completion`]  |
//! | [`Listener::deferred`]       | settling the returned [`Deferred`]   |
//!
//! Listeners are compared by identity: a clone of a listener is the same
//! listener, two listeners built from identical closures are not.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use topichub::{Hub, Listener};
//!
//! let hub = Hub::new();
//! let greet = Listener::new(|delivery| Ok(Some(json!(format!("hello {}", delivery.topic())))));
//! hub.on("greet.*", greet.clone()).unwrap();
//!
//! assert_eq!(hub.emit("greet.world", vec![]).unwrap(), Some(json!("hello greet.world")));
//! assert!(hub.un("greet.*", Some(&greet)).unwrap());
//! ```

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deferred::Deferred;
use crate::dispatch::{Completion, Delivery, Next};
use crate::error::ListenerError;

/// What a synchronous listener returns
pub type ListenerResult = Result<Option<Value>, ListenerError>;

type SyncFn = dyn Fn(&mut Delivery) -> ListenerResult;
type CallbackFn = dyn Fn(&mut Delivery, Completion) -> Result<(), ListenerError>;
type DeferredFn = dyn Fn(&mut Delivery) -> Result<Deferred, ListenerError>;
type FilterFn = dyn Fn(&mut Delivery, Next) -> Result<(), ListenerError>;

pub(crate) enum ListenerFn {
    Sync(Box<SyncFn>),
    Callback(Box<CallbackFn>),
    Deferred(Box<DeferredFn>),
}

/// Declared completion style of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    /// Finishes by returning
    Sync,
    /// Finishes by calling its [`Completion`]
    Callback,
    /// Finishes by settling a [`Deferred`]
    Deferred,
}

/// A callback registered against a topic pattern
#[derive(Clone)]
pub struct Listener {
    function: Rc<ListenerFn>,
    name: Option<Rc<str>>,
}

impl Listener {
    /// Listener that finishes when it returns
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Delivery) -> ListenerResult + 'static,
    {
        Self::from_fn(ListenerFn::Sync(Box::new(f)))
    }

    /// Listener that finishes when it calls the injected [`Completion`].
    ///
    /// The completion may be kept and called after the listener returns.
    /// Dropping it without calling completes with no value.
    pub fn with_callback<F>(f: F) -> Self
    where
        F: Fn(&mut Delivery, Completion) -> Result<(), ListenerError> + 'static,
    {
        Self::from_fn(ListenerFn::Callback(Box::new(f)))
    }

    /// Listener that finishes when the returned [`Deferred`] settles
    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn(&mut Delivery) -> Result<Deferred, ListenerError> + 'static,
    {
        Self::from_fn(ListenerFn::Deferred(Box::new(f)))
    }

    fn from_fn(function: ListenerFn) -> Self {
        Self {
            function: Rc::new(function),
            name: None,
        }
    }

    /// Attach a name used in log output
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Rc::from(name.into()));
        self
    }

    /// The name given with [`Listener::named`]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Declared completion style
    pub fn kind(&self) -> ListenerKind {
        match *self.function {
            ListenerFn::Sync(_) => ListenerKind::Sync,
            ListenerFn::Callback(_) => ListenerKind::Callback,
            ListenerFn::Deferred(_) => ListenerKind::Deferred,
        }
    }

    /// Whether both handles refer to the same listener
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.function, &other.function)
    }

    pub(crate) fn function(&self) -> &ListenerFn {
        &self.function
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

/// An interceptor that runs before listeners.
///
/// A filter receives the [`Delivery`] and a [`Next`] continuation. Calling
/// [`Next::call`] runs the remaining filters and the listeners; keeping `Next`
/// suspends delivery until it is called; dropping it uncalled ends delivery
/// without running the listeners.
#[derive(Clone)]
pub struct Filter {
    function: Rc<FilterFn>,
    name: Option<Rc<str>>,
}

impl Filter {
    /// Create a filter
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Delivery, Next) -> Result<(), ListenerError> + 'static,
    {
        Self {
            function: Rc::new(f),
            name: None,
        }
    }

    /// Attach a name used in log output
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Rc::from(name.into()));
        self
    }

    /// The name given with [`Filter::named`]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether both handles refer to the same filter
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.function, &other.function)
    }

    pub(crate) fn call(&self, delivery: &mut Delivery, next: Next) -> Result<(), ListenerError> {
        (self.function)(delivery, next)
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Filter {}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("name", &self.name).finish()
    }
}
