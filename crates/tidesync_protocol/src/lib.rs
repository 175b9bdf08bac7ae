//! # TideSync Protocol
//!
//! Payloads exchanged between a device and the sync coordinator.
//!
//! This crate provides:
//! - [`SyncRequest`] / [`SyncResponse`] and the per-change [`WireChange`]
//! - [`Operation`] codes and the reserved [`DELETE_MARKER`] property token
//! - [`Tidemark`], the opaque per-group cursor issued by the coordinator
//! - JSON encoding/decoding
//!
//! Pure protocol crate: no I/O, no clocks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod operation;
mod tidemark;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{GroupChanges, GroupPoll, SyncRequest, SyncResponse, WireChange};
pub use operation::{is_delete_marker, Operation, DELETE_MARKER};
pub use tidemark::Tidemark;
