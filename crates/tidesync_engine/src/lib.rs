//! # TideSync Engine
//!
//! Session driver for offline-first sync against a central coordinator.
//!
//! This crate provides:
//! - the session state machine (idle → building → awaiting → applying)
//! - the apply engine for inbound field changes and deletes
//! - the tidemark policy deciding when a group cursor may move
//! - an HTTP transport abstraction and a scripted mock transport
//! - a tokio scheduler that ticks sessions in the background
//!
//! ## Session
//!
//! One session is a single request/response exchange:
//! 1. Drain the oldest local changes and the least recently polled groups
//! 2. Send them; the coordinator answers with per-group changes
//! 3. Drop the acknowledged local changes
//! 4. Apply inbound changes group by group, then store each tidemark
//!
//! ## Key Invariants
//!
//! - At most one session runs at a time; overlapping ticks are skipped
//! - A local change leaves the log only after the coordinator accepted it
//! - A tidemark never moves backwards
//! - A change for an unknown field is deferred, never dropped

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod config;
mod error;
mod http;
mod scheduler;
mod state;
mod transport;

pub use apply::{ApplyEngine, ApplyOutcome};
pub use config::{SyncConfig, TidemarkPolicy, DEFAULT_BATCH_SIZE};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpFailure, HttpTransport, LoopbackClient, LoopbackServer, SYNC_PATH};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use state::{ReplayReport, SessionReport, SessionState, SyncEngine, SyncStats};
pub use transport::{MockTransport, SyncTransport};
