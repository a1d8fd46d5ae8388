//! The public hub.
//!
//! A [`Hub`] owns its listener and filter indices. It is a cheap handle:
//! clones share the same registrations, which is how callbacks reach the hub
//! they are running in.
//!
//! ```rust
//! use serde_json::json;
//! use topichub::{Hub, Listener};
//!
//! let hub = Hub::new();
//! hub.on("order.*", Listener::new(|d| Ok(Some(json!(d.topic())))))
//!     .unwrap();
//! hub.on("order.paid", Listener::new(|_| Ok(Some(json!("specific")))))
//!     .unwrap();
//!
//! // Most specific pattern runs first, the last defined value wins
//! assert_eq!(hub.emit("order.paid", vec![]).unwrap(), Some(json!("order.paid")));
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use topichub_config::{ConfigError, HubConfig};

use crate::aggregate::Strategy;
use crate::deferred::Deferred;
use crate::dispatch::{Dispatch, Mode, Step};
use crate::error::{EmitResult, HubError, HubResult};
use crate::listener::{Filter, Listener};
use crate::registry::Registry;
use crate::topic::Topic;

thread_local! {
    static DEFAULT_HUB: Hub = Hub::new();
}

/// Handle to this thread's default hub
pub fn default_hub() -> Hub {
    DEFAULT_HUB.with(Hub::clone)
}

/// Per-emission options
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    strategy: Option<Strategy>,
}

impl EmitOptions {
    /// Options with every default
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge listener values with `strategy` instead of the configured one
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// The strategy override, if any
    pub fn strategy(&self) -> Option<&Strategy> {
        self.strategy.as_ref()
    }
}

pub(crate) struct HubInner {
    config: HubConfig,
    pub(crate) registry: RefCell<Registry>,
    depth: Cell<usize>,
}

/// Topic-based publish/subscribe hub
#[derive(Clone)]
pub struct Hub {
    inner: Rc<HubInner>,
}

impl Hub {
    /// Create a hub with the default configuration
    pub fn new() -> Self {
        Self::build(HubConfig::default())
    }

    /// Create a hub with a validated configuration
    pub fn with_config(config: HubConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: HubConfig) -> Self {
        let registry = Registry::new(config.delimiter.as_char(), config.listener_order);
        Self {
            inner: Rc::new(HubInner {
                config,
                registry: RefCell::new(registry),
                depth: Cell::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<HubInner>) -> Self {
        Self { inner }
    }

    /// The configuration this hub was built with
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Remove every listener and filter.
    ///
    /// Dispatches in flight skip the callbacks they have not reached yet.
    pub fn reset(&self) {
        self.inner.registry.borrow_mut().clear();
        tracing::debug!("hub reset");
    }

    // -- listeners --

    /// Register a listener under `pattern`
    pub fn on(&self, pattern: &str, listener: Listener) -> HubResult<()> {
        self.register_listener(pattern, listener, false)
    }

    /// Alias of [`Hub::on`]
    pub fn subscribe(&self, pattern: &str, listener: Listener) -> HubResult<()> {
        self.on(pattern, listener)
    }

    /// Alias of [`Hub::on`]
    pub fn add_listener(&self, pattern: &str, listener: Listener) -> HubResult<()> {
        self.on(pattern, listener)
    }

    /// Register a listener removed after its first successful delivery.
    ///
    /// A delivery that fails leaves the listener registered.
    pub fn once(&self, pattern: &str, listener: Listener) -> HubResult<()> {
        self.register_listener(pattern, listener, true)
    }

    fn register_listener(&self, pattern: &str, listener: Listener, once: bool) -> HubResult<()> {
        let name = listener.name().unwrap_or("<anonymous>").to_string();
        self.inner
            .registry
            .borrow_mut()
            .listeners
            .add(pattern, listener, once)?;
        tracing::debug!(pattern, listener = %name, once, "listener registered");
        Ok(())
    }

    /// Remove `listener` from `pattern`, or every listener of `pattern` when
    /// `listener` is `None`.
    ///
    /// Returns whether anything was removed. A malformed pattern is an error
    /// even though nothing could have been registered under it.
    pub fn un(&self, pattern: &str, listener: Option<&Listener>) -> HubResult<bool> {
        self.parse(pattern)?;
        let mut registry = self.inner.registry.borrow_mut();
        let removed = match listener {
            Some(listener) => registry.listeners.remove(pattern, listener),
            None => registry.listeners.remove_pattern(pattern) > 0,
        };
        tracing::debug!(pattern, removed, "listener removal");
        Ok(removed)
    }

    /// Remove one listener from `pattern`
    pub fn unsubscribe(&self, pattern: &str, listener: &Listener) -> HubResult<bool> {
        self.un(pattern, Some(listener))
    }

    /// Alias of [`Hub::unsubscribe`]
    pub fn remove_listener(&self, pattern: &str, listener: &Listener) -> HubResult<bool> {
        self.un(pattern, Some(listener))
    }

    /// Listeners registered under exactly `pattern`, in registration order
    pub fn listeners(&self, pattern: &str) -> HubResult<Vec<Listener>> {
        self.parse(pattern)?;
        Ok(self.inner.registry.borrow().listeners.chain(pattern))
    }

    /// Remove the listeners of one exact pattern, or of every pattern.
    ///
    /// Returns how many listeners were removed.
    pub fn remove_all_listeners(&self, pattern: Option<&str>) -> HubResult<usize> {
        let removed = match pattern {
            Some(pattern) => {
                self.parse(pattern)?;
                self.inner
                    .registry
                    .borrow_mut()
                    .listeners
                    .remove_pattern(pattern)
            }
            None => {
                let mut registry = self.inner.registry.borrow_mut();
                let patterns = registry.listeners.patterns();
                patterns
                    .iter()
                    .map(|p| registry.listeners.remove_pattern(p))
                    .sum::<usize>()
            }
        };
        tracing::debug!(?pattern, removed, "listeners removed");
        Ok(removed)
    }

    /// Remove the listeners of every pattern an emission of `pattern` would
    /// reach.
    pub fn remove_all_matching(&self, pattern: &str) -> HubResult<usize> {
        let topic = self.parse(pattern)?;
        let removed = self
            .inner
            .registry
            .borrow_mut()
            .listeners
            .remove_matching(&topic);
        tracing::debug!(pattern, removed, "matching listeners removed");
        Ok(removed)
    }

    /// Total number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.registry.borrow().listeners.len()
    }

    /// Patterns that have at least one listener, sorted
    pub fn patterns(&self) -> Vec<String> {
        self.inner.registry.borrow().listeners.patterns()
    }

    // -- filters --

    /// Register a filter under `pattern`
    pub fn add_filter(&self, pattern: &str, filter: Filter) -> HubResult<()> {
        self.register_filter(pattern, filter, false)
    }

    /// Register a filter removed after its first successful run
    pub fn filter_once(&self, pattern: &str, filter: Filter) -> HubResult<()> {
        self.register_filter(pattern, filter, true)
    }

    fn register_filter(&self, pattern: &str, filter: Filter, once: bool) -> HubResult<()> {
        let name = filter.name().unwrap_or("<anonymous>").to_string();
        self.inner
            .registry
            .borrow_mut()
            .filters
            .add(pattern, filter, once)?;
        tracing::debug!(pattern, filter = %name, once, "filter registered");
        Ok(())
    }

    /// Remove `filter` from `pattern`
    pub fn remove_filter(&self, pattern: &str, filter: &Filter) -> HubResult<bool> {
        self.parse(pattern)?;
        Ok(self.inner.registry.borrow_mut().filters.remove(pattern, filter))
    }

    /// Filters registered under exactly `pattern`, in registration order
    pub fn filters(&self, pattern: &str) -> HubResult<Vec<Filter>> {
        self.parse(pattern)?;
        Ok(self.inner.registry.borrow().filters.chain(pattern))
    }

    // -- emission --

    /// Emit `topic` and return what is available when every listener has
    /// been started.
    ///
    /// Listener errors come back as `Err` after all listeners ran. Callback
    /// and deferred listeners that have not finished yet read as no value;
    /// if they fail later the failure is logged.
    pub fn emit(&self, topic: &str, args: Vec<Value>) -> EmitResult {
        self.emit_with_options(topic, args, EmitOptions::default())
    }

    /// [`Hub::emit`] with per-emission options
    pub fn emit_with_options(
        &self,
        topic: &str,
        args: Vec<Value>,
        options: EmitOptions,
    ) -> EmitResult {
        let dispatch = self.dispatch(topic, args, Mode::Emit, options)?;
        if let Some(result) = dispatch.outcome().result() {
            return result;
        }

        let reported = dispatch.error_count();
        let partial = dispatch.partial();
        let topic = topic.to_string();
        dispatch.outcome().on_settle(move |result| {
            if let Err(error) = result {
                if error.listener_errors().len() > reported {
                    tracing::warn!(
                        topic = %topic,
                        error = %error,
                        "listener failed after emit returned"
                    );
                }
            }
        });
        partial
    }

    /// Emit `topic` and hand the final result to `callback` once every
    /// listener, including late finishers, is done.
    ///
    /// Only malformed topics and the nesting limit are reported through the
    /// return value.
    pub fn emit_with<F>(
        &self,
        topic: &str,
        args: Vec<Value>,
        options: EmitOptions,
        callback: F,
    ) -> HubResult<()>
    where
        F: FnOnce(EmitResult) + 'static,
    {
        let dispatch = self.dispatch(topic, args, Mode::Emit, options)?;
        dispatch.outcome().on_settle(callback);
        Ok(())
    }

    /// Run the matching callbacks as one sequential chain.
    ///
    /// The returned handle settles with the merged result once the chain has
    /// finished or was stopped.
    pub fn publish(&self, topic: &str, args: Vec<Value>) -> HubResult<Deferred> {
        self.publish_with(topic, args, EmitOptions::default())
    }

    /// [`Hub::publish`] with per-emission options
    pub fn publish_with(
        &self,
        topic: &str,
        args: Vec<Value>,
        options: EmitOptions,
    ) -> HubResult<Deferred> {
        let dispatch = self.dispatch(topic, args, Mode::Chain, options)?;
        Ok(dispatch.outcome().clone())
    }

    fn parse(&self, raw: &str) -> HubResult<Topic> {
        Ok(Topic::parse(raw, self.inner.config.delimiter.as_char())?)
    }

    fn dispatch(
        &self,
        topic: &str,
        args: Vec<Value>,
        mode: Mode,
        options: EmitOptions,
    ) -> HubResult<Rc<Dispatch>> {
        let topic = self.parse(topic)?;

        let limit = self.inner.config.max_dispatch_depth;
        let depth = self.inner.depth.get();
        if depth >= limit {
            tracing::warn!(topic = %topic, limit, "dispatch nested too deeply");
            return Err(HubError::DepthExceeded(limit));
        }

        let steps: Vec<Step> = {
            let registry = self.inner.registry.borrow();
            let order = registry.order();
            let filters = registry.filters.matching(&topic, order);
            let listeners = registry.listeners.matching(&topic, order);
            filters
                .into_iter()
                .map(Step::Filter)
                .chain(listeners.into_iter().map(Step::Listener))
                .collect()
        };

        let strategy = options
            .strategy
            .unwrap_or_else(|| Strategy::from(self.inner.config.strategy));
        let dispatch = Dispatch::new(
            Rc::downgrade(&self.inner),
            topic,
            mode,
            strategy,
            steps,
            args,
        );

        let _guard = DepthGuard::enter(&self.inner.depth);
        dispatch.start();
        Ok(dispatch)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.borrow();
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("listeners", &registry.listeners.len())
            .field("filters", &registry.filters.len())
            .finish()
    }
}

/// Tracks synchronous nesting of dispatches
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}
