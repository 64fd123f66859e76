//! Multi-version in-memory table.
//!
//! Every write creates a new version of a key tagged with the batch's
//! sequence number. Entries are ordered by key ascending, then sequence
//! descending, so the first entry at or below a read sequence is the
//! version visible to that read. A `None` value is a tombstone.

use crate::range::{Direction, KeyRange};
use crate::types::SequenceNumber;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

type VersionKey = (Vec<u8>, Reverse<u64>);

#[derive(Debug, Default)]
pub(crate) struct Memtable {
    entries: BTreeMap<VersionKey, Option<Vec<u8>>>,
    /// Keys holding anything other than exactly one live version.
    ///
    /// Only these can be pruned, which keeps snapshot release cheap.
    untidy: BTreeSet<Vec<u8>>,
}

impl Memtable {
    /// Applies one version per key at `seq`, then prunes the touched keys.
    pub(crate) fn apply<'a, I>(&mut self, seq: SequenceNumber, writes: I, pinned: &[u64])
    where
        I: IntoIterator<Item = (&'a [u8], Option<&'a [u8]>)>,
    {
        let mut touched = BTreeSet::new();
        for (key, value) in writes {
            self.entries
                .insert((key.to_vec(), Reverse(seq.as_u64())), value.map(<[u8]>::to_vec));
            touched.insert(key.to_vec());
        }
        for key in touched {
            self.prune_key(&key, pinned);
        }
    }

    /// Returns the value of `key` visible at `seq`.
    pub(crate) fn get(&self, key: &[u8], seq: SequenceNumber) -> Option<&[u8]> {
        let lower = (key.to_vec(), Reverse(seq.as_u64()));
        let upper = (key.to_vec(), Reverse(0));
        self.entries
            .range(lower..=upper)
            .next()
            .and_then(|(_, value)| value.as_deref())
    }

    /// Visits every live key in `range` as of `seq` until `visit` returns false.
    pub(crate) fn scan(
        &self,
        range: &KeyRange,
        direction: Direction,
        seq: SequenceNumber,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) {
        if let (Some(start), Some(end)) = (&range.start, &range.end) {
            if start >= end {
                return;
            }
        }
        let bounds = version_bounds(range);
        let read_seq = seq.as_u64();
        match direction {
            Direction::Forward => {
                // Versions of one key arrive newest first; the first one at
                // or below `read_seq` decides the key.
                let mut decided: Option<&[u8]> = None;
                for ((key, Reverse(version)), value) in self.entries.range(bounds) {
                    if *version > read_seq || decided == Some(key.as_slice()) {
                        continue;
                    }
                    decided = Some(key.as_slice());
                    if let Some(value) = value {
                        if !visit(key.as_slice(), value.as_slice()) {
                            return;
                        }
                    }
                }
            }
            Direction::Reverse => {
                // Versions of one key arrive oldest first; the last one at
                // or below `read_seq` decides the key.
                let mut current: Option<&[u8]> = None;
                let mut visible: Option<&Option<Vec<u8>>> = None;
                for ((key, Reverse(version)), value) in self.entries.range(bounds).rev() {
                    if current != Some(key.as_slice()) {
                        if let (Some(k), Some(Some(v))) = (current, visible) {
                            if !visit(k, v.as_slice()) {
                                return;
                            }
                        }
                        current = Some(key.as_slice());
                        visible = None;
                    }
                    if *version <= read_seq {
                        visible = Some(value);
                    }
                }
                if let (Some(k), Some(Some(v))) = (current, visible) {
                    visit(k, v.as_slice());
                }
            }
        }
    }

    /// Prunes every key with superseded versions.
    pub(crate) fn prune_all(&mut self, pinned: &[u64]) {
        let keys: Vec<Vec<u8>> = self.untidy.iter().cloned().collect();
        for key in keys {
            self.prune_key(&key, pinned);
        }
    }

    /// Drops versions of `key` no reader can observe.
    ///
    /// The newest version is kept for latest reads, plus the newest version
    /// at or below each pinned sequence. A tombstone that is the only
    /// survivor is dropped since absence reads the same.
    fn prune_key(&mut self, key: &[u8], pinned: &[u64]) {
        let versions: Vec<(u64, bool)> = self
            .entries
            .range((key.to_vec(), Reverse(u64::MAX))..=(key.to_vec(), Reverse(0)))
            .map(|((_, Reverse(v)), value)| (*v, value.is_some()))
            .collect();

        let mut keep: BTreeSet<u64> = BTreeSet::new();
        if let Some(&(newest, _)) = versions.first() {
            keep.insert(newest);
        }
        for &pin in pinned {
            if let Some(&(v, _)) = versions.iter().find(|(v, _)| *v <= pin) {
                keep.insert(v);
            }
        }
        if keep.len() == 1 {
            let only = versions.iter().find(|(v, _)| keep.contains(v));
            if let Some(&(v, false)) = only {
                keep.remove(&v);
            }
        }

        for &(v, _) in &versions {
            if !keep.contains(&v) {
                self.entries.remove(&(key.to_vec(), Reverse(v)));
            }
        }

        let single_live = keep.len() == 1
            && versions
                .iter()
                .any(|(v, live)| *live && keep.contains(v));
        if single_live || keep.is_empty() {
            self.untidy.remove(key);
        } else {
            self.untidy.insert(key.to_vec());
        }
    }

    /// Returns every live entry as of `seq`, in key order.
    pub(crate) fn live_entries(&self, seq: SequenceNumber) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        self.scan(&KeyRange::all(), Direction::Forward, seq, &mut |k, v| {
            out.push((k.to_vec(), v.to_vec()));
            true
        });
        out
    }

    #[cfg(test)]
    pub(crate) fn version_count(&self) -> usize {
        self.entries.len()
    }
}

fn version_bounds(range: &KeyRange) -> (Bound<VersionKey>, Bound<VersionKey>) {
    let start = match &range.start {
        Some(s) => Bound::Included((s.clone(), Reverse(u64::MAX))),
        None => Bound::Unbounded,
    };
    let end = match &range.end {
        Some(e) => Bound::Excluded((e.clone(), Reverse(u64::MAX))),
        None => Bound::Unbounded,
    };
    (start, end)
}
