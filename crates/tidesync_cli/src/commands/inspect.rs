//! Inspect command implementation.

use super::{format_size, open_store, render, CliResult};
use crate::Format;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Changes awaiting upload.
    pub pending_changes: usize,
    /// Tombstoned record ids.
    pub tombstones: usize,
    /// Deferred inbound changes.
    pub deferred: usize,
    /// Known sync groups.
    pub groups: usize,
    /// Group new records are assigned to when committed on this store.
    pub default_group: String,
    /// Records a compaction would keep.
    pub live_records: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<String> {
    let store = open_store(path)?;
    let summary = store.summary()?;
    let result = InspectResult {
        path: path.display().to_string(),
        journal_bytes: summary.journal_bytes,
        pending_changes: summary.pending_changes,
        tombstones: summary.tombstones,
        deferred: summary.deferred,
        groups: summary.groups,
        default_group: store.default_group(),
        live_records: store.compaction_preview(),
    };
    render(&result, format, text)
}

fn text(result: &InspectResult) -> String {
    [
        "TideSync Store Inspection".to_string(),
        "=========================".to_string(),
        String::new(),
        format!("Path: {}", result.path),
        format!("Journal: {} ({} live records)", format_size(result.journal_bytes), result.live_records),
        String::new(),
        format!("  Pending changes: {}", result.pending_changes),
        format!("  Tombstones:      {}", result.tombstones),
        format!("  Deferred:        {}", result.deferred),
        format!("  Groups:          {}", result.groups),
        format!("  Default group:   {}", result.default_group),
    ]
    .join("\n")
}
