//! Monotone [`SequenceId`] ordering.
//!
//! A `SequenceId` is a server-opaque token attached to every confirmed
//! event and to the snapshot. The default ordering interprets both sides
//! as integers when they parse as such, and falls back to lexicographic
//! comparison otherwise -- the same rule used by the default event
//! [`crate::stream::Orderer`].

use std::cmp::Ordering;
use std::fmt;

/// A monotone, server-opaque sequence token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SequenceId(String);

impl SequenceId {
    /// Wraps a raw sequence token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SequenceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SequenceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Total order over two sequence tokens: numeric comparison when both
/// parse as `i128`, lexicographic otherwise.
///
/// This is the default ordering used both by [`SequenceId::cmp_default`]
/// and by the Stream's default reordering [`crate::stream::Orderer`].
#[must_use]
pub fn compare_default(a: &str, b: &str) -> Ordering {
    match (a.parse::<i128>(), b.parse::<i128>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

impl SequenceId {
    /// Orders `self` against `other` using [`compare_default`].
    #[must_use]
    pub fn cmp_default(&self, other: &SequenceId) -> Ordering {
        compare_default(&self.0, &other.0)
    }

    /// True if `self` is strictly greater than `other` under the default
    /// ordering -- the test applied when deciding whether to apply a
    /// confirmed event (spec: duplicates with `sequenceId <= current` are
    /// discarded).
    #[must_use]
    pub fn is_after(&self, other: &SequenceId) -> bool {
        self.cmp_default(other) == Ordering::Greater
    }
}
