//! Permanent set of deleted record ids.

use std::collections::BTreeSet;

/// Record ids whose deletion has been processed.
///
/// An id never leaves this set. The apply engine consults it before
/// creating a record from an inbound change so a late write cannot
/// resurrect a deleted key.
#[derive(Debug, Default)]
pub struct TombstoneStore {
    ids: BTreeSet<String>,
}

impl TombstoneStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tombstone. Returns false if it was already present.
    pub fn insert(&mut self, record_id: impl Into<String>) -> bool {
        self.ids.insert(record_id.into())
    }

    /// Returns true if `record_id` is tombstoned.
    #[must_use]
    pub fn contains(&self, record_id: &str) -> bool {
        self.ids.contains(record_id)
    }

    /// Number of tombstones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if there are no tombstones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All tombstoned ids, sorted.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}
