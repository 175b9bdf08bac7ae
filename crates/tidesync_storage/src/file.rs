//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix of the scratch file written during [`StorageBackend::replace`].
const REPLACE_SUFFIX: &str = "rewrite";

/// A byte store backed by one file.
///
/// - `flush()` pushes buffered data to the OS
/// - `sync()` calls `File::sync_all()`
/// - `replace()` writes a sibling scratch file, fsyncs it and renames it
///   over the original, so a crash leaves either the old or the new file
///
/// ```no_run
/// use tidesync_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("sync.journal")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates the file at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates the file, creating parent directories first.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn scratch_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".");
        name.push(REPLACE_SUFFIX);
        PathBuf::from(name)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();
        let offset = *size;

        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let scratch = self.scratch_path();
        {
            let mut tmp = File::create(&scratch)?;
            tmp.write_all(data)?;
            tmp.sync_all()?;
        }
        fs::rename(&scratch, &self.path)?;

        let reopened = Self::open_file(&self.path)?;
        let new_size = reopened.metadata()?.len();
        *self.file.write() = reopened;
        *self.size.write() = new_size;
        Ok(())
    }
}
