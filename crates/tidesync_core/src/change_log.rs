//! Ordered log of local field mutations awaiting upload.

use crate::types::ChangeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tidesync_protocol::{Operation, WireChange, DELETE_MARKER};

/// One field-level mutation.
///
/// Immutable once logged. A later write to the same field produces a new
/// change rather than editing this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Local id.
    pub id: ChangeId,
    /// Encoded visibility group.
    pub group: String,
    /// Entity name.
    pub entity: String,
    /// Record primary key.
    pub record_id: String,
    /// Field name, or the delete marker.
    pub property: String,
    /// Encrypted value.
    pub value: String,
    /// Operation code.
    pub operation: Operation,
    /// Commit time, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Change {
    /// Returns true if this change deletes its record.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        tidesync_protocol::is_delete_marker(&self.property)
    }

    /// Builds the delete-marker change for a record.
    #[must_use]
    pub fn delete_marker(
        id: ChangeId,
        group: impl Into<String>,
        entity: impl Into<String>,
        record_id: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            id,
            group: group.into(),
            entity: entity.into(),
            record_id: record_id.into(),
            property: DELETE_MARKER.to_string(),
            value: String::new(),
            operation: Operation::Delete,
            timestamp,
        }
    }

    /// Converts to the wire form, stamping its age relative to `now`.
    #[must_use]
    pub fn to_wire(&self, now: u64) -> WireChange {
        WireChange {
            group: self.group.clone(),
            entity: self.entity.clone(),
            record_id: self.record_id.clone(),
            property: self.property.clone(),
            value: self.value.clone(),
            seconds_ago: now.saturating_sub(self.timestamp) as i64,
            operation: self.operation,
            modified: self.timestamp.to_string(),
        }
    }
}

/// In-memory index of committed changes, ordered oldest first.
///
/// Ordering is by `(timestamp, id)`: ids break ties between changes
/// committed in the same millisecond.
#[derive(Debug, Default)]
pub struct ChangeLog {
    entries: BTreeMap<(u64, ChangeId), Change>,
    by_id: HashMap<ChangeId, u64>,
}

impl ChangeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a committed change.
    pub fn insert(&mut self, change: Change) {
        if let Some(old_ts) = self.by_id.insert(change.id, change.timestamp) {
            self.entries.remove(&(old_ts, change.id));
        }
        self.entries.insert((change.timestamp, change.id), change);
    }

    /// Returns up to `limit` oldest changes without removing them.
    #[must_use]
    pub fn drain_oldest(&self, limit: usize) -> Vec<Change> {
        self.entries.values().take(limit).cloned().collect()
    }

    /// Removes the given changes. Returns how many were present.
    pub fn remove(&mut self, ids: &[ChangeId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(ts) = self.by_id.remove(id) {
                self.entries.remove(&(ts, *id));
                removed += 1;
            }
        }
        removed
    }

    /// Returns true if a change with `id` is pending.
    #[must_use]
    pub fn contains(&self, id: ChangeId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Number of pending changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All pending changes, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.entries.values()
    }
}
