//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// # Invariants
///
/// - `append` returns the offset where the data begins
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `flush` returns, appended data survives process termination
/// - `replace` swaps the whole contents atomically: a reader (or a crash)
///   observes either the old bytes or the new bytes, never a mix
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the range extends past the current size.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes pending writes to durable storage.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata. Stronger than [`flush`](Self::flush).
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops everything after `new_size`.
    ///
    /// Used to cut a torn record off the tail after a crash.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the entire contents with `data`.
    ///
    /// Used by journal compaction.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Reads the entire contents.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }
}
