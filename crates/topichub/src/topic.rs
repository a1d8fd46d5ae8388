//! Topic parsing and the segment-level `covers` relation.
//!
//! A topic is a delimiter-separated list of segments. Each segment is either a
//! literal (`[A-Za-z0-9_:-]+`), a single wildcard `*` (exactly one segment) or
//! a double wildcard `**` (one or more segments).

use std::fmt;

use crate::error::ValidationError;

/// One segment of a topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A literal segment that only matches itself
    Literal(String),
    /// `*` - exactly one segment
    Single,
    /// `**` - one or more segments
    Multi,
}

impl Segment {
    /// Whether this segment is `*` or `**`
    pub fn is_wildcard(&self) -> bool {
        !matches!(self, Self::Literal(_))
    }
}

/// A validated topic or pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    raw: String,
    delimiter: char,
    segments: Vec<Segment>,
}

impl Topic {
    /// Parse and validate a topic string
    pub fn parse(raw: &str, delimiter: char) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::EmptyTopic);
        }

        let mut segments = Vec::new();
        for part in raw.split(delimiter) {
            segments.push(parse_segment(raw, part)?);
        }

        Ok(Self {
            raw: raw.to_string(),
            delimiter,
            segments,
        })
    }

    /// The original string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The delimiter this topic was parsed with
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Parsed segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the topic has no segments
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether any segment is a wildcard
    pub fn is_wildcard(&self) -> bool {
        self.segments.iter().any(Segment::is_wildcard)
    }

    /// Whether every concrete instance of `other` is also an instance of `self`.
    ///
    /// Works on segments, so both sides may contain wildcards:
    /// `a.**` covers `a.*.c`, `a.*` does not cover `a.**`.
    pub fn covers(&self, other: &Topic) -> bool {
        let general = &self.segments;
        let specific = &other.segments;
        let (n, m) = (general.len(), specific.len());

        // table[i][j]: general[i..] covers specific[j..]
        let mut table = vec![vec![false; m + 1]; n + 1];
        table[n][m] = true;

        for i in (0..n).rev() {
            for j in (0..m).rev() {
                table[i][j] = match &general[i] {
                    Segment::Multi => table[i + 1][j + 1] || table[i][j + 1],
                    Segment::Single => {
                        !matches!(specific[j], Segment::Multi) && table[i + 1][j + 1]
                    }
                    Segment::Literal(lit) => {
                        matches!(&specific[j], Segment::Literal(other) if other == lit)
                            && table[i + 1][j + 1]
                    }
                };
            }
        }

        table[0][0]
    }

    /// Whether either topic covers the other
    pub fn overlaps(&self, other: &Topic) -> bool {
        self.covers(other) || other.covers(self)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Characters allowed in a literal segment
pub fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-')
}

fn parse_segment(topic: &str, part: &str) -> Result<Segment, ValidationError> {
    match part {
        "" => Err(ValidationError::EmptySegment {
            topic: topic.to_string(),
        }),
        "*" => Ok(Segment::Single),
        "**" => Ok(Segment::Multi),
        _ if part.contains('*') => Err(ValidationError::InvalidWildcard {
            topic: topic.to_string(),
            segment: part.to_string(),
        }),
        _ if !part.chars().all(is_segment_char) => Err(ValidationError::InvalidSegment {
            topic: topic.to_string(),
            segment: part.to_string(),
        }),
        _ => Ok(Segment::Literal(part.to_string())),
    }
}
