//! Holding area for inbound changes the local schema cannot take yet.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a deferred change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeferredKey {
    /// Record primary key.
    pub record_id: String,
    /// Entity name.
    pub entity: String,
    /// Property the change targets.
    pub property: String,
}

impl DeferredKey {
    /// Creates a key.
    pub fn new(
        record_id: impl Into<String>,
        entity: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            entity: entity.into(),
            property: property.into(),
        }
    }
}

/// An inbound change parked until its property exists locally.
///
/// The value is kept exactly as received, still encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredChange {
    /// Record primary key.
    pub record_id: String,
    /// Entity name.
    pub entity: String,
    /// Property the change targets.
    pub property: String,
    /// Value as received.
    pub raw_value: String,
    /// Encoded group the change arrived in.
    pub group: String,
}

impl DeferredChange {
    /// The cache key of this entry.
    #[must_use]
    pub fn key(&self) -> DeferredKey {
        DeferredKey::new(&self.record_id, &self.entity, &self.property)
    }
}

/// Deferred changes keyed by `(record_id, entity, property)`.
///
/// Holds at most one entry per key; a later arrival replaces the earlier
/// value.
#[derive(Debug, Default)]
pub struct DeferredChangeCache {
    entries: BTreeMap<DeferredKey, DeferredChange>,
}

impl DeferredChangeCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a change, returning the entry it replaced.
    pub fn store(&mut self, change: DeferredChange) -> Option<DeferredChange> {
        self.entries.insert(change.key(), change)
    }

    /// Looks up an entry.
    #[must_use]
    pub fn get(&self, key: &DeferredKey) -> Option<&DeferredChange> {
        self.entries.get(key)
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &DeferredKey) -> Option<DeferredChange> {
        self.entries.remove(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is deferred.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &DeferredChange> {
        self.entries.values()
    }
}
