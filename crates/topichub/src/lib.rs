//! Topic-based publish/subscribe hub for single-threaded, in-process use.
//!
//! Listeners and filters register against hierarchical topic patterns such as
//! `user.*.created` or `audit/**`. Emitting a topic runs every matching
//! callback, most specific pattern first, and merges what they return into one
//! result.
//!
//! ## Patterns
//!
//! - literal segments (`[A-Za-z0-9_:-]+`) match themselves
//! - `*` matches exactly one segment
//! - `**` matches one or more segments
//!
//! An emitted topic may contain wildcards too; it then reaches every pattern
//! it overlaps with.
//!
//! ## Two ways to emit
//!
//! - [`Hub::emit`] / [`Hub::emit_with`]: filters run as a chain, then every
//!   listener starts without waiting on the others. Late finishers are
//!   awaited before the completion callback runs.
//! - [`Hub::publish`]: filters and listeners run as one sequential chain with
//!   [`Delivery::stop_propagation`] and [`Delivery::propagate`] flow control.
//!   Returns a [`Deferred`] that can also be `.await`ed.
//!
//! ## Usage
//!
//! ```rust
//! use serde_json::json;
//! use topichub::{Filter, Hub, Listener};
//!
//! let hub = Hub::new();
//!
//! hub.add_filter("audit.**", Filter::new(|delivery, next| {
//!     delivery.update_args(|args| args.push(json!("checked")));
//!     next.call();
//!     Ok(())
//! }))?;
//!
//! hub.on("audit.*", Listener::new(|delivery| {
//!     Ok(Some(json!(delivery.args().len())))
//! }))?;
//!
//! assert_eq!(hub.emit("audit.login", vec![json!("ada")])?, Some(json!(2)));
//! # Ok::<(), topichub::HubError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod aggregate;
mod deferred;
mod dispatch;
mod error;
mod hub;
mod index;
mod listener;
mod matcher;
mod registry;
mod topic;

pub use aggregate::{combine_errors, Aggregator, Slot, Strategy};
pub use deferred::Deferred;
pub use dispatch::{Completion, Delivery, Next};
pub use error::{
    AggregateError, EmitResult, HubError, HubResult, ListenerError, ValidationError,
};
pub use hub::{default_hub, EmitOptions, Hub};
pub use index::{EntryId, PatternEntry, PatternIndex};
pub use listener::{Filter, Listener, ListenerKind, ListenerResult};
pub use matcher::{compare_specificity, comparison_key, Matcher};
pub use topic::{is_segment_char, Segment, Topic};

pub use topichub_config::{
    ConfigError, ConfigLoader, Delimiter, HubConfig, ListenerOrder, StrategyKind,
};
