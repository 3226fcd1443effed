//! Collection sub-keys and sub-key ranges.

use std::cmp::Ordering;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Ordering key of an element inside a per-key ordered collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BKey(u64);

impl BKey {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl Display for BKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<BKey> for u64 {
    fn from(bkey: BKey) -> Self {
        bkey.0
    }
}

/// Scan direction of a sub-key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    /// Orders two sub-keys so that the one visited first compares `Less`.
    pub fn compare(self, a: BKey, b: BKey) -> Ordering {
        match self {
            Direction::Ascending => a.cmp(&b),
            Direction::Descending => b.cmp(&a),
        }
    }
}

/// Inclusive sub-key range `from..to`.
///
/// The range is ascending when `from < to` and descending otherwise; a
/// single-point range (`from == to`) is treated as descending, which is
/// indistinguishable for a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BKeyRange {
    from: BKey,
    to: BKey,
}

impl BKeyRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self {
            from: BKey(from),
            to: BKey(to),
        }
    }

    pub fn start(&self) -> BKey {
        self.from
    }

    pub fn end(&self) -> BKey {
        self.to
    }

    pub fn direction(&self) -> Direction {
        if self.from < self.to {
            Direction::Ascending
        } else {
            Direction::Descending
        }
    }

    pub fn contains(&self, bkey: BKey) -> bool {
        let (low, high) = if self.from <= self.to {
            (self.from, self.to)
        } else {
            (self.to, self.from)
        };
        low <= bkey && bkey <= high
    }
}

impl Display for BKeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}..{}", self.from, self.to)
        }
    }
}
