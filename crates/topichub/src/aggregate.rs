//! Result aggregation for one emission.
//!
//! Every listener invocation opens a positional slot. Slots settle with a
//! value (possibly none) or an error, synchronously or later. When all slots
//! have settled the [`Aggregator`] folds them into one [`EmitResult`]:
//!
//! - no errors: values merged with the emission's [`Strategy`]
//! - one error: that error, unchanged
//! - two or more: an [`AggregateError`] listing them in invocation order
//!
//! Filter failures have no slot. Every filter is invoked before any listener,
//! so they are listed first, ordered by the filter's position in the chain
//! rather than by when the failure happened.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use topichub_config::StrategyKind;

use crate::error::{AggregateError, EmitResult, HubError, ListenerError};
use crate::listener::ListenerResult;

type MergeFn = dyn Fn(&[Option<Value>]) -> Option<Value>;

/// How listener return values merge into the emission result
#[derive(Clone, Default)]
pub enum Strategy {
    /// Last defined value, scanning from the end
    #[default]
    Last,
    /// Array of every defined value, in invocation order
    Concat,
    /// Caller-supplied merge over the positional values
    Custom(Rc<MergeFn>),
}

impl Strategy {
    /// Wrap a merge function
    pub fn custom<F>(merge: F) -> Self
    where
        F: Fn(&[Option<Value>]) -> Option<Value> + 'static,
    {
        Self::Custom(Rc::new(merge))
    }

    /// Merge positional values
    pub fn merge(&self, values: &[Option<Value>]) -> Option<Value> {
        match self {
            Self::Last => values.iter().rev().find_map(Clone::clone),
            Self::Concat => Some(Value::Array(values.iter().flatten().cloned().collect())),
            Self::Custom(merge) => merge(values),
        }
    }
}

impl From<StrategyKind> for Strategy {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Last => Self::Last,
            StrategyKind::Concat => Self::Concat,
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Last => write!(f, "Last"),
            Self::Concat => write!(f, "Concat"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// State of one listener's contribution
#[derive(Debug, Clone)]
pub enum Slot {
    /// Listener has not finished
    Pending,
    /// Listener finished, with or without a value
    Value(Option<Value>),
    /// Listener failed
    Failed(ListenerError),
}

/// Positional collector of listener outcomes
#[derive(Debug, Default)]
pub struct Aggregator {
    slots: Vec<Slot>,
    pending: usize,
    /// Filter failures keyed by chain position
    failures: Vec<(usize, ListenerError)>,
}

impl Aggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a pending slot, returning its position
    pub fn open(&mut self) -> usize {
        self.slots.push(Slot::Pending);
        self.pending += 1;
        self.slots.len() - 1
    }

    /// Settle a slot. Returns false if the slot does not exist or already
    /// settled; later outcomes for the same slot are ignored.
    pub fn settle(&mut self, slot: usize, result: ListenerResult) -> bool {
        let Some(current) = self.slots.get_mut(slot) else {
            return false;
        };
        if !matches!(current, Slot::Pending) {
            return false;
        }
        *current = match result {
            Ok(value) => Slot::Value(value),
            Err(error) => Slot::Failed(error),
        };
        self.pending -= 1;
        true
    }

    /// Mark a slot failed, replacing a value it may already hold.
    ///
    /// Returns false if the slot does not exist or already failed.
    pub fn fail_slot(&mut self, slot: usize, error: ListenerError) -> bool {
        let Some(current) = self.slots.get_mut(slot) else {
            return false;
        };
        match current {
            Slot::Failed(_) => return false,
            Slot::Pending => self.pending -= 1,
            Slot::Value(_) => {}
        }
        *current = Slot::Failed(error);
        true
    }

    /// Record a failure that has no slot (a failing filter) at its
    /// position in the chain
    pub fn fail(&mut self, position: usize, error: ListenerError) {
        let at = self.failures.partition_point(|(p, _)| *p <= position);
        self.failures.insert(at, (position, error));
    }

    /// Number of slots still pending
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Number of slots opened
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot was opened
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All slots in invocation order
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Values by position; pending and failed slots read as `None`
    pub fn values(&self) -> Vec<Option<Value>> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Value(value) => value.clone(),
                Slot::Pending | Slot::Failed(_) => None,
            })
            .collect()
    }

    /// Errors in invocation order, slotless failures first
    pub fn errors(&self) -> Vec<ListenerError> {
        let failed_slots = self.slots.iter().filter_map(|slot| match slot {
            Slot::Failed(error) => Some(error.clone()),
            _ => None,
        });
        self.failures
            .iter()
            .map(|(_, error)| error.clone())
            .chain(failed_slots)
            .collect()
    }

    /// Fold the current slots into a result.
    ///
    /// `replacement` (set by a listener that stopped the chain with a value)
    /// takes the place of the merged value. Errors take precedence over both.
    pub fn finish(&self, strategy: &Strategy, replacement: Option<Value>) -> EmitResult {
        if let Some(error) = combine_errors(self.errors()) {
            return Err(error);
        }
        Ok(replacement.or_else(|| strategy.merge(&self.values())))
    }
}

/// Combine listener errors: none, the single error as is, or an aggregate
pub fn combine_errors(mut errors: Vec<ListenerError>) -> Option<HubError> {
    match errors.len() {
        0 => None,
        1 => errors.pop().map(HubError::Listener),
        _ => Some(HubError::Aggregate(AggregateError::new(errors))),
    }
}
