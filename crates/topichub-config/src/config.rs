//! Hub configuration types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default limit for nested (re-entrant) dispatches on one hub
pub const DEFAULT_MAX_DISPATCH_DEPTH: usize = 64;

/// Errors produced while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the hub cannot run with
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// I/O error while reading a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Segment delimiter used by topics and patterns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Delimiter {
    /// `a.b.c`
    #[default]
    #[serde(rename = ".", alias = "dot")]
    Dot,
    /// `a/b/c`
    #[serde(rename = "/", alias = "slash")]
    Slash,
}

impl Delimiter {
    /// The delimiter character
    pub fn as_char(self) -> char {
        match self {
            Self::Dot => '.',
            Self::Slash => '/',
        }
    }
}

impl std::fmt::Display for Delimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Order of callbacks registered under the same exact pattern
///
/// Across different patterns the most specific pattern always runs first;
/// this only decides the order inside one pattern's chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerOrder {
    /// Earlier registrations run first
    #[default]
    Insertion,
    /// Later registrations run first and can override earlier ones
    Override,
}

/// Built-in strategy for merging listener return values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Last defined value wins
    #[default]
    Last,
    /// All defined values, in invocation order
    Concat,
}

/// Configuration for a hub instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Topic segment delimiter
    pub delimiter: Delimiter,

    /// Ordering inside a single pattern's chain
    pub listener_order: ListenerOrder,

    /// Merge strategy used when an emission does not pick one
    pub strategy: StrategyKind,

    /// Maximum nesting of emissions triggered from inside callbacks
    pub max_dispatch_depth: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            delimiter: Delimiter::default(),
            listener_order: ListenerOrder::default(),
            strategy: StrategyKind::default(),
            max_dispatch_depth: DEFAULT_MAX_DISPATCH_DEPTH,
        }
    }
}

impl HubConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delimiter
    pub fn with_delimiter(mut self, delimiter: Delimiter) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the per-pattern listener order
    pub fn with_listener_order(mut self, order: ListenerOrder) -> Self {
        self.listener_order = order;
        self
    }

    /// Set the default merge strategy
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the maximum dispatch nesting depth
    pub fn with_max_dispatch_depth(mut self, depth: usize) -> Self {
        self.max_dispatch_depth = depth;
        self
    }

    /// Check that the configuration can be used to build a hub
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_dispatch_depth == 0 {
            return Err(ConfigError::invalid(
                "max_dispatch_depth",
                "must allow at least one dispatch",
            ));
        }
        Ok(())
    }
}
