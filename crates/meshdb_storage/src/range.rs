//! Key ranges and scan direction.

/// Order in which a scan visits keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Ascending byte order.
    #[default]
    Forward,
    /// Descending byte order.
    Reverse,
}

/// A half-open range of keys `[start, end)`.
///
/// `None` on either side means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub start: Option<Vec<u8>>,
    /// Exclusive upper bound.
    pub end: Option<Vec<u8>>,
}

impl KeyRange {
    /// The range covering every key.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// The range `[start, end)`.
    #[must_use]
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    /// The range of every key starting with `prefix`.
    #[must_use]
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: Some(prefix.to_vec()),
            end: prefix_successor(prefix),
        }
    }

    /// Returns true if `key` lies inside the range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let above_start = self.start.as_deref().map_or(true, |s| key >= s);
        let below_end = self.end.as_deref().map_or(true, |e| key < e);
        above_start && below_end
    }
}

/// Returns the shortest key greater than every key starting with `prefix`.
///
/// Trailing `0xFF` bytes cannot be incremented and are dropped. A prefix of
/// only `0xFF` bytes (or an empty prefix) has no successor.
#[must_use]
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_range_bounds() {
        let range = KeyRange::prefix(b"model:people:");
        assert_eq!(range.start.as_deref(), Some(&b"model:people:"[..]));
        assert_eq!(range.end.as_deref(), Some(&b"model:people;"[..]));
        assert!(range.contains(b"model:people:foo"));
        assert!(!range.contains(b"model:peoples:foo"));
    }

    #[test]
    fn successor_skips_ff() {
        assert_eq!(prefix_successor(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_successor(b""), None);
    }

    #[test]
    fn half_open() {
        let range = KeyRange::new(b"b".to_vec(), b"d".to_vec());
        assert!(!range.contains(b"a"));
        assert!(range.contains(b"b"));
        assert!(range.contains(b"c\xFF"));
        assert!(!range.contains(b"d"));
        assert!(KeyRange::all().contains(b"anything"));
    }
}
