//! HTTP transport.
//!
//! The request body is the JSON-encoded [`SyncRequest`], POSTed to
//! `<server_url>/sync`. The HTTP library itself sits behind
//! [`HttpClient`] so applications can bring their own (reqwest, ureq,
//! a platform networking stack).

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use std::time::Duration;
use thiserror::Error;
use tidesync_protocol::{SyncRequest, SyncResponse};

/// Path of the sync endpoint, relative to the server URL.
pub const SYNC_PATH: &str = "/sync";

/// Failure reported by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpFailure {
    /// No response within the time bound.
    #[error("request timed out")]
    TimedOut,
    /// Connection or status failure.
    #[error("{0}")]
    Failed(String),
}

/// Minimal HTTP client.
pub trait HttpClient: Send + Sync {
    /// Sends a POST and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, HttpFailure>;

    /// Checks if the client can reach the network.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Sync transport over an [`HttpClient`].
pub struct HttpTransport<C: HttpClient> {
    endpoint: String,
    client: C,
    timeout: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for `server_url`.
    pub fn new(server_url: impl AsRef<str>, client: C) -> Self {
        let base = server_url.as_ref().trim_end_matches('/');
        Self {
            endpoint: format!("{base}{SYNC_PATH}"),
            client,
            timeout: Duration::from_secs(30),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport using the URL and timeout of `config`.
    pub fn from_config(config: &SyncConfig, client: C) -> Self {
        Self::new(&config.server_url, client).with_timeout(config.timeout)
    }

    /// Sets the exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL requests are POSTed to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Message of the last failed exchange, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn fail(&self, err: SyncError) -> SyncError {
        *self.last_error.write() = Some(err.to_string());
        err
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn send(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        if !self.client.is_healthy() {
            return Err(self.fail(SyncError::transport_retryable("client is offline")));
        }

        let body = request
            .encode()
            .map_err(|e| self.fail(SyncError::Protocol(format!("failed to encode request: {e}"))))?;

        tracing::trace!(url = %self.endpoint, bytes = body.len(), "posting sync request");
        let response = self
            .client
            .post(&self.endpoint, body, self.timeout)
            .map_err(|failure| {
                self.fail(match failure {
                    HttpFailure::TimedOut => SyncError::Timeout,
                    HttpFailure::Failed(message) => SyncError::transport_retryable(message),
                })
            })?;

        let decoded = SyncResponse::decode(&response)
            .map_err(|e| self.fail(SyncError::Protocol(format!("failed to decode response: {e}"))))?;
        *self.last_error.write() = None;
        Ok(decoded)
    }
}

/// In-process server reachable through [`LoopbackClient`].
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to `path` and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// [`HttpClient`] that routes requests straight into a [`LoopbackServer`].
///
/// Useful for tests and for embedding a coordinator in the same process.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Wraps a server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, HttpFailure> {
        let path = url
            .find("://")
            .and_then(|scheme| url[scheme + 3..].find('/').map(|p| &url[scheme + 3 + p..]))
            .unwrap_or(url);
        self.server.handle_post(path, &body).map_err(HttpFailure::Failed)
    }
}
