//! Dump commands: list the contents of one sync table.

use super::{open_store, render, CliResult};
use crate::Format;
use serde::Serialize;
use std::path::Path;
use tidesync_core::{Change, DeferredChange, GroupCursor};

/// Pending change as listed by `dump-changes`.
#[derive(Debug, Serialize)]
pub struct ChangeInfo {
    /// Local id.
    pub id: u64,
    /// Commit time, ms since the Unix epoch.
    pub timestamp: u64,
    /// Encoded group.
    pub group: String,
    /// Entity name.
    pub entity: String,
    /// Record id.
    pub record_id: String,
    /// Property, or the delete marker.
    pub property: String,
    /// Operation name.
    pub operation: String,
    /// Size of the opaque value.
    pub value_bytes: usize,
}

impl From<&Change> for ChangeInfo {
    fn from(change: &Change) -> Self {
        Self {
            id: change.id.0,
            timestamp: change.timestamp,
            group: change.group.clone(),
            entity: change.entity.clone(),
            record_id: change.record_id.clone(),
            property: change.property.clone(),
            operation: format!("{:?}", change.operation),
            value_bytes: change.value.len(),
        }
    }
}

/// Runs `dump-changes`.
pub fn changes(path: &Path, limit: Option<usize>, format: Format) -> CliResult<String> {
    let store = open_store(path)?;
    let rows: Vec<ChangeInfo> = store
        .drain_oldest(limit.unwrap_or(usize::MAX))
        .iter()
        .map(ChangeInfo::from)
        .collect();
    render(&rows, format, |rows| {
        let mut out = format!("{} pending change(s)", rows.len());
        for row in rows {
            out.push_str(&format!(
                "\n  chg:{:<6} {} {}/{}.{} {} group={} ({} bytes)",
                row.id,
                row.timestamp,
                row.entity,
                row.record_id,
                row.property,
                row.operation,
                row.group,
                row.value_bytes
            ));
        }
        out
    })
}

/// Runs `dump-groups`.
pub fn groups(path: &Path, format: Format) -> CliResult<String> {
    let store = open_store(path)?;
    let rows: Vec<GroupCursor> = store.groups();
    render(&rows, format, |rows| {
        let mut out = format!("{} group(s)", rows.len());
        for row in rows {
            out.push_str(&format!(
                "\n  {} name={} tidemark={} last_polled_at={}",
                row.encoded,
                row.name.as_deref().unwrap_or("-"),
                row.tidemark.as_ref().map_or("-", |t| t.as_str()),
                row.last_polled_at
            ));
        }
        out
    })
}

/// Runs `dump-tombstones`.
pub fn tombstones(path: &Path, format: Format) -> CliResult<String> {
    let store = open_store(path)?;
    let rows = store.tombstones();
    render(&rows, format, |rows| {
        let mut out = format!("{} tombstone(s)", rows.len());
        for id in rows {
            out.push_str("\n  ");
            out.push_str(id);
        }
        out
    })
}

/// Runs `dump-deferred`.
pub fn deferred(path: &Path, format: Format) -> CliResult<String> {
    let store = open_store(path)?;
    let rows: Vec<DeferredChange> = store.deferred_changes();
    render(&rows, format, |rows| {
        let mut out = format!("{} deferred change(s)", rows.len());
        for row in rows {
            out.push_str(&format!(
                "\n  {}/{}.{} group={} ({} bytes)",
                row.entity,
                row.record_id,
                row.property,
                row.group,
                row.raw_value.len()
            ));
        }
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seeded_store;

    #[test]
    fn changes_respect_limit() {
        let dir = seeded_store();
        let out = changes(dir.path(), Some(1), Format::Json).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["record_id"], "P1");
        assert_eq!(json[0]["operation"], "Set");
    }

    #[test]
    fn groups_text() {
        let dir = seeded_store();
        let out = groups(dir.path(), Format::Text).unwrap();
        assert!(out.starts_with("1 group(s)"));
        assert!(out.contains("g1 name=- tidemark=3 last_polled_at=1000"));
    }

    #[test]
    fn tombstones_and_deferred() {
        let dir = seeded_store();
        assert_eq!(tombstones(dir.path(), Format::Text).unwrap(), "1 tombstone(s)\n  P9");

        let out = deferred(dir.path(), Format::Json).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json[0]["property"], "nickname");
        assert_eq!(json[0]["raw_value"], "\"Bobby\"");
    }
}
