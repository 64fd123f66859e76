//! Storage backend trait definition.

use crate::error::StorageResult;

/// Byte store underneath the commit log.
///
/// Backends are **opaque, append-only byte stores**. They do not know the
/// frame format of the commit log; the [`crate::Engine`] owns all
/// interpretation of the bytes.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte appended (and not truncated) so far
/// - `replace` atomically swaps the whole content for new bytes
/// - Backends must be `Send + Sync` for concurrent access
pub trait StorageBackend: Send + Sync {
    /// Reads the complete content of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Drops everything after `new_size`.
    ///
    /// Used to cut a torn record off the end of the commit log.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Replaces the whole content with `data`.
    ///
    /// Either the old or the new content survives a crash, never a mix.
    ///
    /// # Errors
    ///
    /// Returns an error if the new content cannot be written.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
