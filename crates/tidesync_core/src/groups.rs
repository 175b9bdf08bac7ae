//! Per-group incremental cursors.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tidesync_protocol::Tidemark;

/// Group every record falls back to when the application sets none.
pub const FALLBACK_GROUP: &str = "default";

/// Encodes a readable group name for the wire.
///
/// Lowercase hex of the first 16 bytes of SHA-256 over the name, so the
/// coordinator never sees readable group names.
#[must_use]
pub fn encode_group_name(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(&digest[..16])
}

/// Cursor state of one sync group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCursor {
    /// Encoded group name, as used on the wire.
    pub encoded: String,
    /// Readable name, known only for groups this device subscribed to.
    pub name: Option<String>,
    /// Last tidemark consumed. `None` until the first successful poll.
    pub tidemark: Option<Tidemark>,
    /// When the group was last polled, ms since the Unix epoch. 0 = never.
    pub last_polled_at: u64,
}

impl GroupCursor {
    fn new(encoded: impl Into<String>) -> Self {
        Self {
            encoded: encoded.into(),
            name: None,
            tidemark: None,
            last_polled_at: 0,
        }
    }
}

/// Result of offering a new tidemark to a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorAdvance {
    /// The tidemark was stored.
    Advanced,
    /// Both tidemarks are numeric and the offered one was lower; it was
    /// ignored.
    Regressed,
    /// No tidemark was offered; only the poll time moved.
    Touched,
}

/// Cursor table keyed by encoded group name.
#[derive(Debug, Default)]
pub struct GroupCursorTable {
    groups: HashMap<String, GroupCursor>,
}

impl GroupCursorTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a readable group this device wants to receive.
    pub fn subscribe(&mut self, name: &str) -> &GroupCursor {
        let encoded = encode_group_name(name);
        let cursor = self
            .groups
            .entry(encoded.clone())
            .or_insert_with(|| GroupCursor::new(encoded));
        cursor.name = Some(name.to_string());
        cursor
    }

    /// Looks up a cursor, creating it for a never-seen encoded name.
    ///
    /// Returns the cursor and whether it was created.
    pub fn resolve(&mut self, encoded: &str) -> (&GroupCursor, bool) {
        let mut created = false;
        let cursor = self.groups.entry(encoded.to_string()).or_insert_with(|| {
            created = true;
            GroupCursor::new(encoded)
        });
        (cursor, created)
    }

    /// Looks up a cursor.
    #[must_use]
    pub fn get(&self, encoded: &str) -> Option<&GroupCursor> {
        self.groups.get(encoded)
    }

    /// Up to `n` cursors, least recently polled first.
    ///
    /// Ties break on the encoded name so the order is stable.
    #[must_use]
    pub fn poll(&self, n: usize) -> Vec<GroupCursor> {
        let mut cursors: Vec<&GroupCursor> = self.groups.values().collect();
        cursors.sort_by(|a, b| {
            a.last_polled_at
                .cmp(&b.last_polled_at)
                .then_with(|| a.encoded.cmp(&b.encoded))
        });
        cursors.into_iter().take(n).cloned().collect()
    }

    /// Stores a new tidemark and poll time for a group.
    ///
    /// The coordinator's tidemark overwrites the stored one, except that a
    /// numeric tidemark below a numeric stored one is ignored. The poll
    /// time advances either way.
    pub fn advance(
        &mut self,
        encoded: &str,
        tidemark: Option<Tidemark>,
        now: u64,
    ) -> (&GroupCursor, CursorAdvance) {
        let cursor = self
            .groups
            .entry(encoded.to_string())
            .or_insert_with(|| GroupCursor::new(encoded));
        cursor.last_polled_at = cursor.last_polled_at.max(now);

        let outcome = match tidemark {
            None => CursorAdvance::Touched,
            Some(new) => match &cursor.tidemark {
                Some(old) if new.is_behind(old) => CursorAdvance::Regressed,
                _ => {
                    cursor.tidemark = Some(new);
                    CursorAdvance::Advanced
                }
            },
        };
        (cursor, outcome)
    }

    /// Replaces a cursor wholesale. Used by journal replay.
    pub fn upsert(&mut self, cursor: GroupCursor) {
        self.groups.insert(cursor.encoded.clone(), cursor);
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if no group is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All cursors, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &GroupCursor> {
        self.groups.values()
    }
}
