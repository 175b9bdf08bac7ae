//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Why a session failed.
///
/// None of these is fatal: the engine returns to idle and the outbound
/// batch stays in the change log for the next tick.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the exchange can be retried.
        retryable: bool,
    },

    /// The exchange exceeded its time bound.
    #[error("exchange timed out")]
    Timeout,

    /// Malformed or undecodable response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The coordinator answered `Success = false`.
    #[error("coordinator rejected the exchange: {}", errors.join("; "))]
    Application {
        /// Error strings from the response.
        errors: Vec<String>,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] tidesync_core::CoreError),

    /// Another session is running.
    #[error("a sync session is already in progress")]
    SessionInProgress,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the next tick may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::Application { .. } | SyncError::SessionInProgress => {
                true
            }
            SyncError::Protocol(_) | SyncError::Store(_) => false,
        }
    }

    /// Error strings for the last-session status surface.
    pub fn messages(&self) -> Vec<String> {
        match self {
            SyncError::Application { errors } if !errors.is_empty() => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<tidesync_protocol::ProtocolError> for SyncError {
    fn from(err: tidesync_protocol::ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
