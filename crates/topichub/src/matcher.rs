//! Topic matcher: compiled pattern predicate plus priority key.
//!
//! A pattern compiles into an anchored regular expression used to test
//! concrete topics, and a comparison key whose lexicographic order is the
//! dispatch priority order:
//!
//! | pattern   | key     |
//! |-----------|---------|
//! | `foo.bar` | `a.a`   |
//! | `foo.*`   | `a.b`   |
//! | `foo.**`  | `a.c`   |
//! | `*.bar`   | `b.a`   |
//!
//! Literal segments sort before `*`, which sorts before `**`, so a wildcard
//! appearing later in the pattern ranks as more specific.

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;

use crate::error::{HubResult, ValidationError};
use crate::topic::{Segment, Topic};

/// Regex for one literal segment
const SEGMENT_CLASS: &str = "[A-Za-z0-9_:-]+";

const KEY_LITERAL: char = 'a';
const KEY_SINGLE: char = 'b';
const KEY_MULTI: char = 'c';

/// A compiled topic pattern
#[derive(Clone)]
pub struct Matcher {
    topic: Topic,
    regex: Regex,
    key: String,
}

impl Matcher {
    /// Compile a pattern string
    pub fn compile(pattern: &str, delimiter: char) -> HubResult<Self> {
        let topic = Topic::parse(pattern, delimiter)?;
        Self::from_topic(topic)
    }

    /// Compile an already parsed topic
    pub fn from_topic(topic: Topic) -> HubResult<Self> {
        let source = regex_source(&topic);
        let regex = Regex::new(&source).map_err(|e| ValidationError::Uncompilable {
            pattern: topic.as_str().to_string(),
            reason: e.to_string(),
        })?;
        let key = comparison_key(topic.as_str(), topic.delimiter());

        Ok(Self { topic, regex, key })
    }

    /// The pattern string
    pub fn pattern(&self) -> &str {
        self.topic.as_str()
    }

    /// The parsed pattern
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Whether the pattern contains a wildcard
    pub fn is_wildcard(&self) -> bool {
        self.topic.is_wildcard()
    }

    /// Test a concrete topic string against the pattern
    pub fn test(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }

    /// Whether an emitted topic reaches this pattern.
    ///
    /// Concrete topics go through the regex. Wildcard (broadcast) topics reach
    /// the pattern when either side covers the other.
    pub fn matches(&self, topic: &Topic) -> bool {
        if topic.is_wildcard() {
            self.topic.overlaps(topic)
        } else {
            self.test(topic.as_str())
        }
    }

    /// Whether every instance of `other` is an instance of this pattern
    pub fn covers(&self, other: &Matcher) -> bool {
        self.topic.covers(&other.topic)
    }

    /// Precomputed priority key
    pub fn comparison_key(&self) -> &str {
        &self.key
    }

    /// Specificity order, most specific first
    pub fn compare(&self, other: &Matcher) -> Ordering {
        if !self.is_wildcard() && !other.is_wildcard() {
            return Ordering::Equal;
        }
        self.key.cmp(&other.key)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("pattern", &self.pattern())
            .field("regex", &self.regex.as_str())
            .field("key", &self.key)
            .finish()
    }
}

/// Build the priority key for a pattern string.
///
/// Does not validate; segments other than `*` and `**` count as literals.
pub fn comparison_key(pattern: &str, delimiter: char) -> String {
    pattern
        .split(delimiter)
        .map(|segment| match segment {
            "*" => KEY_SINGLE,
            "**" => KEY_MULTI,
            _ => KEY_LITERAL,
        })
        .fold(String::with_capacity(pattern.len()), |mut key, c| {
            if !key.is_empty() {
                key.push(delimiter);
            }
            key.push(c);
            key
        })
}

/// Compare two patterns by specificity, most specific first.
///
/// `Equal` when neither has a wildcard. Otherwise the pattern whose first
/// wildcard comes later (after a longer literal prefix) sorts first, `*` sorts
/// before `**`, and a leading wildcard is least specific.
pub fn compare_specificity(a: &str, b: &str, delimiter: char) -> Ordering {
    let a_wild = a.contains('*');
    let b_wild = b.contains('*');
    if !a_wild && !b_wild {
        return Ordering::Equal;
    }
    comparison_key(a, delimiter).cmp(&comparison_key(b, delimiter))
}

fn regex_source(topic: &Topic) -> String {
    let delimiter = regex::escape(&topic.delimiter().to_string());
    let parts: Vec<String> = topic
        .segments()
        .iter()
        .map(|segment| match segment {
            Segment::Literal(lit) => regex::escape(lit),
            Segment::Single => SEGMENT_CLASS.to_string(),
            Segment::Multi => format!("{SEGMENT_CLASS}(?:{delimiter}{SEGMENT_CLASS})*"),
        })
        .collect();
    format!("^{}$", parts.join(&delimiter))
}
