//! Store directory layout and locking.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK            # Advisory lock, one process at a time
//! └─ sync.journal    # Journal of all durable sync state
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "sync.journal";

/// An exclusively locked store directory.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens (and optionally creates) a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - the directory is missing and `create_if_missing` is false
    /// - the path is not a directory
    /// - another process holds the lock ([`CoreError::StoreLocked`])
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root of the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }
}
