//! # TideSync Core
//!
//! Durable sync state for one device.
//!
//! This crate provides:
//! - [`SyncStore`], the journaled owner of the change log, tombstones,
//!   deferred cache and group cursors
//! - tracked commits that write an entity and its change rows atomically
//! - the [`ObjectStore`] contract and a schema-checked [`MemoryObjectStore`]
//! - a static [`SchemaRegistry`] answering which fields an entity has
//! - the [`ValueCipher`] contract for opaque wire values
//!
//! The exchange with the coordinator lives in `tidesync_engine`.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tidesync_core::{
//!     EntitySchema, FieldType, MemoryObjectStore, PlaintextCipher, Record, SchemaRegistry,
//!     SyncStore,
//! };
//!
//! let schema = Arc::new(SchemaRegistry::new());
//! schema.register(EntitySchema::builder("Person").field("name", FieldType::Text).build());
//! let objects = MemoryObjectStore::new(schema);
//!
//! let store = SyncStore::open_in_memory().unwrap();
//! let mut person = Record::new("Person", "P1").with_field("name", "Bob");
//! store.commit_tracked(&objects, &mut person, &PlaintextCipher).unwrap();
//! assert_eq!(store.pending_changes(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_log;
mod config;
pub mod crypto;
mod deferred;
#[cfg(feature = "std")]
mod dir;
mod error;
mod groups;
pub mod journal;
mod object_store;
mod record;
mod schema;
mod store;
mod tombstones;
mod types;
mod value;

pub use change_log::{Change, ChangeLog};
pub use config::StoreConfig;
pub use crypto::{PlaintextCipher, ValueCipher};
#[cfg(feature = "encryption")]
pub use crypto::{AesGcmCipher, EncryptionKey};
pub use deferred::{DeferredChange, DeferredChangeCache, DeferredKey};
#[cfg(feature = "std")]
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use groups::{
    encode_group_name, CursorAdvance, GroupCursor, GroupCursorTable, FALLBACK_GROUP,
};
pub use object_store::{MemoryObjectStore, ObjectStore};
pub use record::Record;
pub use schema::{EntitySchema, EntitySchemaBuilder, FieldType, SchemaRegistry};
pub use store::{CompactionReport, StoreSummary, SyncStore};
pub use tombstones::TombstoneStore;
pub use types::{now_millis, ChangeId, TransactionId};
pub use value::FieldValue;
