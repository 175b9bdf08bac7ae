//! Compact command implementation.

use super::{format_size, open_store, render, CliResult};
use crate::Format;
use serde::Serialize;
use std::path::Path;

/// Compaction outcome.
#[derive(Debug, Serialize)]
pub struct CompactResult {
    /// Whether the journal was left untouched.
    pub dry_run: bool,
    /// Journal size before.
    pub bytes_before: u64,
    /// Journal size after, or unchanged on a dry run.
    pub bytes_after: u64,
    /// Records the compacted journal holds.
    pub records: usize,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool, format: Format) -> CliResult<String> {
    let store = open_store(path)?;
    let result = if dry_run {
        let size = store.journal_size()?;
        CompactResult {
            dry_run,
            bytes_before: size,
            bytes_after: size,
            records: store.compaction_preview(),
        }
    } else {
        let report = store.compact()?;
        CompactResult {
            dry_run,
            bytes_before: report.before_bytes,
            bytes_after: report.after_bytes,
            records: report.records,
        }
    };

    render(&result, format, |r| {
        if r.dry_run {
            format!(
                "Journal is {}; compaction would keep {} records (dry run)",
                format_size(r.bytes_before),
                r.records
            )
        } else {
            format!(
                "Compacted journal: {} -> {} ({} records)",
                format_size(r.bytes_before),
                format_size(r.bytes_after),
                r.records
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seeded_store;
    use tidesync_core::{StoreConfig, SyncStore};

    #[test]
    fn dry_run_leaves_journal_alone() {
        let dir = seeded_store();
        let before = std::fs::metadata(dir.path().join("sync.journal")).unwrap().len();
        let out = run(dir.path(), true, Format::Text).unwrap();
        assert!(out.contains("dry run"));
        let after = std::fs::metadata(dir.path().join("sync.journal")).unwrap().len();
        assert_eq!(before, after);
    }

    #[test]
    fn compaction_keeps_state() {
        let dir = seeded_store();
        run(dir.path(), false, Format::Json).unwrap();

        let store = SyncStore::open(dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(store.pending_changes(), 2);
        assert!(store.is_tombstoned("P9"));
        assert_eq!(store.deferred_changes().len(), 1);
    }
}
