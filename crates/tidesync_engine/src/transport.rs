//! Transport abstraction for the exchange with the coordinator.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tidesync_protocol::{SyncRequest, SyncResponse};

/// Carries one request to the coordinator and brings back its response.
///
/// Implementations own timeouts and connection handling. A slow exchange
/// must surface as [`SyncError::Timeout`], an undecodable body as
/// [`SyncError::Protocol`].
pub trait SyncTransport: Send + Sync {
    /// Performs one request/response exchange.
    fn send(&self, request: &SyncRequest) -> SyncResult<SyncResponse>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    fn send(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        (**self).send(request)
    }
}

/// Scripted transport for tests.
///
/// Responses are handed out in the order they were pushed. Every request
/// is recorded so tests can inspect what the engine sent.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<SyncResult<SyncResponse>>>,
    requests: Mutex<Vec<SyncRequest>>,
    delay: Option<Duration>,
}

impl MockTransport {
    /// Creates a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps this long inside every exchange.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a response.
    pub fn push_response(&self, response: SyncResponse) {
        self.script.lock().push_back(Ok(response));
    }

    /// Queues a failed exchange.
    pub fn push_error(&self, error: SyncError) {
        self.script.lock().push_back(Err(error));
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    /// Number of exchanges attempted.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<SyncRequest> {
        self.requests.lock().last().cloned()
    }

    /// Scripted entries not consumed yet.
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl SyncTransport for MockTransport {
    fn send(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transport_retryable("no scripted response")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SyncRequest {
        SyncRequest::new("app", "device", "key")
    }

    #[test]
    fn script_is_consumed_in_order() {
        let transport = MockTransport::new();
        transport.push_response(SyncResponse::success(vec![]));
        transport.push_error(SyncError::Timeout);

        assert!(transport.send(&request()).unwrap().success);
        assert!(matches!(transport.send(&request()), Err(SyncError::Timeout)));
        assert_eq!(transport.request_count(), 2);
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn empty_script_is_a_retryable_failure() {
        let transport = MockTransport::new();
        let err = transport.send(&request()).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_request().unwrap().device_id, "device");
    }
}
