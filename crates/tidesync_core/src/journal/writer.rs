//! Journal writer.

use crate::error::CoreResult;
use crate::journal::iterator::{JournalIterator, ScanEnd};
use crate::journal::record::JournalRecord;
use parking_lot::Mutex;
use tidesync_storage::StorageBackend;

/// Append-only journal over a storage backend.
///
/// Appends from concurrent writers are serialized on the backend lock; each
/// record (or batch) lands as one contiguous write.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
}

impl Journal {
    /// Creates a journal over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// Appends one record. Returns its offset.
    pub fn append(&self, record: &JournalRecord) -> CoreResult<u64> {
        let data = record.encode()?;
        self.write(&data)
    }

    /// Appends several records as one contiguous write. Returns the offset
    /// of the first.
    pub fn append_all(&self, records: &[JournalRecord]) -> CoreResult<u64> {
        let mut data = Vec::new();
        for record in records {
            data.extend(record.encode()?);
        }
        self.write(&data)
    }

    fn write(&self, data: &[u8]) -> CoreResult<u64> {
        let mut backend = self.backend.lock();
        let offset = backend.append(data)?;
        if self.sync_on_write {
            backend.flush()?;
        }
        Ok(offset)
    }

    /// Reads every record and reports how the scan ended.
    ///
    /// # Errors
    ///
    /// Fails on the first corrupt record.
    pub fn scan(&self) -> CoreResult<(Vec<JournalRecord>, ScanEnd)> {
        let data = self.backend.lock().read_all()?;
        let mut iter = JournalIterator::new(data);
        let mut records = Vec::new();
        for item in iter.by_ref() {
            records.push(item?.1);
        }
        Ok((records, iter.end().unwrap_or(ScanEnd::Clean)))
    }

    /// Reads every record, trimming a torn tail so later appends start on
    /// a record boundary.
    pub fn recover(&self) -> CoreResult<Vec<JournalRecord>> {
        let (records, end) = self.scan()?;
        if let ScanEnd::TornTail { offset, bytes } = end {
            tracing::warn!(offset, bytes, "trimming torn record at journal tail");
            let mut backend = self.backend.lock();
            backend.truncate(offset)?;
            backend.sync()?;
        }
        Ok(records)
    }

    /// Atomically replaces the journal with `records`. Returns the new size.
    pub fn rewrite(&self, records: &[JournalRecord]) -> CoreResult<u64> {
        let mut data = Vec::new();
        for record in records {
            data.extend(record.encode()?);
        }
        let mut backend = self.backend.lock();
        backend.replace(&data)?;
        backend.sync()?;
        Ok(data.len() as u64)
    }

    /// Flushes pending writes.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Current size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
