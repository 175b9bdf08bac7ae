//! Error types for TideSync core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the durable sync state and its collaborators.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tidesync_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR or JSON encoding of a value or journal payload failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Journal is corrupted.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Byte offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch in a journal record.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Byte offset of the bad record.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// Invalid store layout or format.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Entity type is not registered in the local schema.
    #[error("unknown entity: {name}")]
    UnknownEntity {
        /// Entity name.
        name: String,
    },

    /// The object store refused a tracked commit.
    #[error("object store refused commit of {entity} {record_id}")]
    CommitRefused {
        /// Entity name.
        entity: String,
        /// Record primary key.
        record_id: String,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed.
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivationFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unknown entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Creates a commit refused error.
    pub fn commit_refused(entity: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::CommitRefused {
            entity: entity.into(),
            record_id: record_id.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a key derivation failed error.
    pub fn key_derivation_failed(message: impl Into<String>) -> Self {
        Self::KeyDerivationFailed {
            message: message.into(),
        }
    }

    /// Returns true if the error means the on-disk journal cannot be trusted.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::JournalCorruption { .. } | Self::ChecksumMismatch { .. }
        )
    }
}
