//! Listener and filter registry.
//!
//! Two pattern indices, one per callback kind, holding [`Subscription`]
//! records. A subscription stays shared (`Rc`) between the index and any
//! dispatch that snapshotted it, so removal during a dispatch is seen by that
//! dispatch through the `active` flag.

use std::cell::Cell;
use std::rc::Rc;

use topichub_config::ListenerOrder;

use crate::error::HubResult;
use crate::index::PatternIndex;
use crate::listener::{Filter, Listener};
use crate::topic::Topic;

/// Callback types the registry can hold
pub(crate) trait Callback: Clone {
    fn same(&self, other: &Self) -> bool;
    fn label(&self) -> Option<&str>;
}

impl Callback for Listener {
    fn same(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }

    fn label(&self) -> Option<&str> {
        self.name()
    }
}

impl Callback for Filter {
    fn same(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }

    fn label(&self) -> Option<&str> {
        self.name()
    }
}

/// One registration of a callback under a pattern
pub(crate) struct Subscription<C> {
    id: u64,
    pattern: Rc<str>,
    callback: C,
    once: bool,
    active: Cell<bool>,
    claimed: Cell<bool>,
}

impl<C: Callback> Subscription<C> {
    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    pub(crate) fn callback(&self) -> &C {
        &self.callback
    }

    pub(crate) fn label(&self) -> &str {
        self.callback.label().unwrap_or("<anonymous>")
    }

    pub(crate) fn is_once(&self) -> bool {
        self.once
    }

    /// Reserve the subscription for one invocation.
    ///
    /// False when it was removed, or when it is a `once` subscription already
    /// taken by another invocation.
    pub(crate) fn claim(&self) -> bool {
        if !self.active.get() {
            return false;
        }
        if self.once {
            if self.claimed.get() {
                return false;
            }
            self.claimed.set(true);
        }
        true
    }

    /// Re-arm a `once` subscription whose invocation failed
    pub(crate) fn release(&self) {
        self.claimed.set(false);
    }

    fn deactivate(&self) {
        self.active.set(false);
    }
}

/// Chains of one callback kind, keyed by pattern
pub(crate) struct Chains<C> {
    index: PatternIndex<Rc<Subscription<C>>>,
    next_id: u64,
}

impl<C: Callback> Chains<C> {
    fn new(delimiter: char) -> Self {
        Self {
            index: PatternIndex::new(delimiter),
            next_id: 0,
        }
    }

    pub(crate) fn add(&mut self, pattern: &str, callback: C, once: bool) -> HubResult<()> {
        let subscription = Rc::new(Subscription {
            id: self.next_id,
            pattern: Rc::from(pattern),
            callback,
            once,
            active: Cell::new(true),
            claimed: Cell::new(false),
        });
        self.index.insert(pattern, subscription)?;
        self.next_id += 1;
        Ok(())
    }

    pub(crate) fn remove(&mut self, pattern: &str, callback: &C) -> bool {
        self.index
            .remove_where(pattern, |sub| sub.callback.same(callback))
            .map(|sub| sub.deactivate())
            .is_some()
    }

    /// Remove one specific subscription (a finished `once`)
    pub(crate) fn retire(&mut self, subscription: &Subscription<C>) -> bool {
        subscription.deactivate();
        self.index
            .remove_where(&subscription.pattern, |sub| sub.id == subscription.id)
            .is_some()
    }

    /// Remove every callback under an exact pattern
    pub(crate) fn remove_pattern(&mut self, pattern: &str) -> usize {
        let removed = self.index.remove_entry(pattern).unwrap_or_default();
        for sub in &removed {
            sub.deactivate();
        }
        removed.len()
    }

    /// Remove every entry reached by emitting `topic`
    pub(crate) fn remove_matching(&mut self, topic: &Topic) -> usize {
        let patterns: Vec<String> = self
            .index
            .find_matching(topic)
            .into_iter()
            .map(|entry| entry.pattern().to_string())
            .collect();
        patterns
            .iter()
            .map(|pattern| self.remove_pattern(pattern))
            .sum()
    }

    /// Exact-pattern chain, in registration order
    pub(crate) fn chain(&self, pattern: &str) -> Vec<C> {
        self.index
            .get(pattern)
            .map(|entry| {
                entry
                    .chain()
                    .iter()
                    .map(|sub| sub.callback.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subscriptions reached by emitting `topic`, in invocation order
    pub(crate) fn matching(
        &self,
        topic: &Topic,
        order: ListenerOrder,
    ) -> Vec<Rc<Subscription<C>>> {
        let mut matched = Vec::new();
        for entry in self.index.find_matching(topic) {
            match order {
                ListenerOrder::Insertion => matched.extend(entry.chain().iter().cloned()),
                ListenerOrder::Override => matched.extend(entry.chain().iter().rev().cloned()),
            }
        }
        matched
    }

    pub(crate) fn len(&self) -> usize {
        self.index.entries().map(|entry| entry.chain().len()).sum()
    }

    pub(crate) fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.index.patterns().map(str::to_string).collect();
        patterns.sort();
        patterns
    }

    fn clear(&mut self) {
        for entry in self.index.entries() {
            for sub in entry.chain() {
                sub.deactivate();
            }
        }
        self.index.clear();
    }
}

/// Registered listeners and filters of one hub
pub(crate) struct Registry {
    pub(crate) listeners: Chains<Listener>,
    pub(crate) filters: Chains<Filter>,
    order: ListenerOrder,
}

impl Registry {
    pub(crate) fn new(delimiter: char, order: ListenerOrder) -> Self {
        Self {
            listeners: Chains::new(delimiter),
            filters: Chains::new(delimiter),
            order,
        }
    }

    pub(crate) fn order(&self) -> ListenerOrder {
        self.order
    }

    /// Drop every listener and filter
    pub(crate) fn clear(&mut self) {
        self.listeners.clear();
        self.filters.clear();
    }
}
