//! Store configuration.

/// Configuration for opening a [`SyncStore`](crate::SyncStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Create the store directory if it does not exist.
    pub create_if_missing: bool,

    /// Flush the journal after every append.
    pub sync_on_write: bool,

    /// Journal size past which [`SyncStore::maybe_compact`](crate::SyncStore::maybe_compact)
    /// rewrites it. 0 disables automatic compaction.
    pub compact_threshold_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            compact_threshold_bytes: 4 * 1024 * 1024, // 4 MB
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to flush after every append.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn compact_threshold_bytes(mut self, bytes: u64) -> Self {
        self.compact_threshold_bytes = bytes;
        self
    }
}
