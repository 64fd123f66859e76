//! Shared engine types.

use std::fmt;

/// Sequence number of an applied write batch.
///
/// Sequence numbers totally order commits. A snapshot taken at sequence `n`
/// observes exactly the batches numbered `1..=n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The sequence of an empty engine.
    pub const ZERO: Self = Self(0);

    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_increments() {
        assert_eq!(SequenceNumber::ZERO.next(), SequenceNumber::new(1));
    }

    #[test]
    fn display() {
        assert_eq!(SequenceNumber::new(7).to_string(), "seq:7");
    }
}
