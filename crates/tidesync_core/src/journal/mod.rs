//! Append-only journal backing all durable sync state.
//!
//! ## Record envelope
//!
//! ```text
//! | magic "TSJR" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is the CBOR encoding of a [`JournalRecord`]. The checksum
//! covers everything before it.
//!
//! ## Recovery
//!
//! A record cut off by a crash at the tail of the journal ends the log
//! cleanly and is trimmed away. A checksum mismatch, bad magic, unknown
//! version or unknown record type anywhere is corruption and fails the open.

mod iterator;
mod record;
mod writer;

pub use iterator::{JournalIterator, ScanEnd};
pub use record::{compute_crc32, JournalRecord, JournalRecordType, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use writer::Journal;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;
