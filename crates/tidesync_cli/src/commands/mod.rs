//! CLI command implementations.
//!
//! Each command returns its rendered output so it can be tested without
//! capturing stdout.

pub mod compact;
pub mod dump;
pub mod inspect;

use crate::Format;
use serde::Serialize;
use std::path::Path;
use tidesync_core::{StoreConfig, SyncStore};

/// Result type shared by all commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing store without creating anything.
pub fn open_store(path: &Path) -> CliResult<SyncStore> {
    if !path.join("sync.journal").exists() {
        return Err(format!("no sync store found at {}", path.display()).into());
    }
    Ok(SyncStore::open(path, StoreConfig::new().create_if_missing(false))?)
}

/// Renders `value` as JSON, or through `text` otherwise.
pub fn render<T: Serialize>(
    value: &T,
    format: Format,
    text: impl FnOnce(&T) -> String,
) -> CliResult<String> {
    match format {
        Format::Json => Ok(serde_json::to_string_pretty(value)?),
        Format::Text => Ok(text(value)),
    }
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use tidesync_core::{StoreConfig, SyncStore};

    /// A store on disk with a little of everything in it.
    pub fn seeded_store() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStore::open(dir.path(), StoreConfig::default()).unwrap();
        store.record_mutation("Person", "P1", "name", "\"Bob\"", "g1").unwrap();
        store.record_mutation("Person", "P2", "name", "\"Ann\"", "g1").unwrap();
        store.add_tombstone("P9").unwrap();
        store.advance_group("g1", Some(3_u64.into()), 1_000).unwrap();
        store
            .store_deferred(tidesync_core::DeferredChange {
                record_id: "P1".into(),
                entity: "Person".into(),
                property: "nickname".into(),
                raw_value: "\"Bobby\"".into(),
                group: "g1".into(),
            })
            .unwrap();
        dir
    }
}
