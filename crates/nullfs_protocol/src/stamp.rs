//! Version stamps and journal positions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// `(origin node, counter)`, the identity and order of a journal entry.
///
/// Stamps compare by counter, then by origin name. A greater stamp wins a
/// conflict, which makes the lexicographically greater origin win a tie on
/// equal counters.
///
/// The same shape doubles as a pull cursor, where `origin` is the relay
/// and `counter` a position in the relay's journal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionStamp {
    /// Name of the node that created the entry.
    pub origin: String,
    /// Per-origin counter, strictly increasing.
    pub counter: u64,
}

impl VersionStamp {
    /// Creates a stamp.
    pub fn new(origin: impl Into<String>, counter: u64) -> Self {
        Self {
            origin: origin.into(),
            counter,
        }
    }

    /// The cursor that precedes every entry of `origin`.
    pub fn zero(origin: impl Into<String>) -> Self {
        Self::new(origin, 0)
    }

    /// Returns true if this stamp wins against `other`.
    pub fn beats(&self, other: &VersionStamp) -> bool {
        self > other
    }
}

impl Ord for VersionStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.origin.cmp(&other.origin))
    }
}

impl PartialOrd for VersionStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.origin, self.counter)
    }
}

/// Position of an entry in the journal of the node that holds it.
///
/// Positions are local: the same entry has different ids on different
/// nodes. They start at 1 and are never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    /// Creates an entry id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_dominates() {
        assert!(VersionStamp::new("a", 6).beats(&VersionStamp::new("z", 5)));
        assert!(!VersionStamp::new("z", 5).beats(&VersionStamp::new("a", 6)));
    }

    #[test]
    fn tie_goes_to_greater_origin() {
        let a = VersionStamp::new("NodeA", 5);
        let b = VersionStamp::new("NodeB", 5);
        assert!(b.beats(&a));
        assert!(!a.beats(&b));
        assert!(!a.beats(&a));
        assert_eq!(a.clone().max(b.clone()), b);
    }

    proptest::proptest! {
        #[test]
        fn exactly_one_winner(a in "[a-c]{1,2}", b in "[a-c]{1,2}", x in 0u64..4, y in 0u64..4) {
            let left = VersionStamp::new(a, x);
            let right = VersionStamp::new(b, y);
            if left != right {
                proptest::prop_assert!(left.beats(&right) ^ right.beats(&left));
            }
        }
    }

    #[test]
    fn entry_ids_advance() {
        let id = EntryId::default();
        assert_eq!(id.next().as_u64(), 1);
        assert_eq!(id.next().to_string(), "#1");
    }
}
