//! # TideSync Storage
//!
//! Byte stores that hold a device's sync journal.
//!
//! Backends are **opaque**: they append, read back and flush bytes and know
//! nothing about journal records. `tidesync_core` owns the record format.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and throwaway stores
//! - [`FileBackend`] - a single file on disk, survives restarts
//!
//! ## Example
//!
//! ```rust
//! use tidesync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"change row").unwrap();
//! assert_eq!(backend.read_at(offset, 10).unwrap(), b"change row");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
