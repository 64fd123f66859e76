//! Point-in-time read views.

use crate::engine::{EngineInner, KvRead};
use crate::error::StorageResult;
use crate::range::{Direction, KeyRange};
use crate::types::SequenceNumber;
use std::sync::Arc;

/// A consistent read view of the engine as of one sequence number.
///
/// While a snapshot is alive, the versions it can observe are kept in the
/// memtable. Dropping (or [`release`](Self::release)-ing) it unpins the
/// sequence and lets those versions be pruned. Cloning pins again, so each
/// clone releases independently.
pub struct EngineSnapshot {
    inner: Arc<EngineInner>,
    seq: SequenceNumber,
}

impl EngineSnapshot {
    pub(crate) fn new(inner: Arc<EngineInner>, seq: SequenceNumber) -> Self {
        Self { inner, seq }
    }

    /// Returns the sequence number this snapshot reads at.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.seq
    }

    /// Releases the snapshot. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Clone for EngineSnapshot {
    fn clone(&self) -> Self {
        self.inner.pin(self.seq);
        Self::new(Arc::clone(&self.inner), self.seq)
    }
}

impl Drop for EngineSnapshot {
    fn drop(&mut self) {
        self.inner.unpin(self.seq);
    }
}

impl KvRead for EngineSnapshot {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let state = self.inner.state.read();
        Ok(state.memtable.get(key, self.seq).map(<[u8]>::to_vec))
    }

    fn scan(
        &self,
        range: &KeyRange,
        direction: Direction,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> StorageResult<()> {
        let state = self.inner.state.read();
        state.memtable.scan(range, direction, self.seq, visit);
        Ok(())
    }
}

impl std::fmt::Debug for EngineSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSnapshot")
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
