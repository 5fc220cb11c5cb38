//! Per-tunnel request/response correlation.
//!
//! Every outbound `request` frame reserves a slot keyed by `request_id`;
//! the matching `response` frame (or a timeout/cancel) resolves it
//! exactly once. Built on `dashmap` since entries are inserted and
//! removed from different tasks concurrently.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use uniroute_shared::error::{Error, ErrorKind, Result};
use uniroute_shared::protocol::Frame;

/// A single reserved slot awaiting its `response` frame.
struct Pending {
    tx: oneshot::Sender<Frame>,
}

/// Tracks in-flight requests for one tunnel. Every `request_id` this
/// registry hands out is reserved exactly once and resolved exactly
/// once, whichever of `resolve`, `cancel`, or the deadline in `wait`
/// gets there first.
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: DashMap<String, Pending>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Reserve `request_id`, returning the receiving half the gateway
    /// awaits for the matching response.
    pub fn reserve(&self, request_id: String) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, Pending { tx });
        rx
    }

    /// Resolve a pending request with its response frame. Resolving a
    /// `request_id` that isn't pending (already resolved, cancelled, or
    /// never reserved) is reported as `DuplicateResponse` rather than
    /// silently ignored, so callers can log a misbehaving tunnel client.
    pub fn resolve(&self, request_id: &str, response: Frame) -> Result<()> {
        match self.pending.remove(request_id) {
            Some((_, pending)) => {
                // The receiver may already be gone (gateway gave up and
                // dropped it); that's not an error here.
                let _ = pending.tx.send(response);
                Ok(())
            }
            None => Err(Error::wire(
                ErrorKind::DuplicateResponse,
                format!("no pending request for id {request_id}"),
            )),
        }
    }

    /// Drop a reservation without resolving it — used when the gateway's
    /// own wait times out or the inbound HTTP connection is cancelled.
    pub fn cancel(&self, request_id: &str) {
        self.pending.remove(request_id);
    }

    /// Drain all pending reservations, e.g. when the tunnel connection
    /// closes: every outstanding gateway request is woken with a
    /// `ConnectionLost` by simply dropping its sender.
    pub fn drain(&self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Await a reserved response with a deadline, translating a timeout or a
/// dropped sender (tunnel disconnected mid-flight) into the matching
/// `ErrorKind`.
pub async fn wait_for_response(
    rx: oneshot::Receiver<Frame>,
    deadline: Duration,
) -> Result<Frame> {
    match tokio::time::timeout(deadline, rx).await {
        Ok(Ok(frame)) => Ok(frame),
        Ok(Err(_)) => Err(Error::wire(
            ErrorKind::ConnectionLost,
            "tunnel disconnected before responding",
        )),
        Err(_) => Err(Error::wire(ErrorKind::Timeout, "origin did not respond in time")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn response_frame(request_id: &str) -> Frame {
        Frame::Response {
            request_id: request_id.to_string(),
            status: 200,
            headers: HashMap::new(),
            body_b64: String::new(),
            duration_ms: 1,
        }
    }

    #[tokio::test]
    async fn resolve_delivers_to_waiter() {
        let reg = CorrelationRegistry::new();
        let rx = reg.reserve("r1".into());
        reg.resolve("r1", response_frame("r1")).unwrap();
        let frame = wait_for_response(rx, Duration::from_secs(1)).await.unwrap();
        assert!(matches!(frame, Frame::Response { .. }));
    }

    #[tokio::test]
    async fn duplicate_resolve_is_reported() {
        let reg = CorrelationRegistry::new();
        let _rx = reg.reserve("r1".into());
        reg.resolve("r1", response_frame("r1")).unwrap();
        let err = reg.resolve("r1", response_frame("r1")).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::DuplicateResponse));
    }

    #[tokio::test]
    async fn drain_wakes_waiters_as_connection_lost() {
        let reg = CorrelationRegistry::new();
        let rx = reg.reserve("r1".into());
        reg.drain();
        let err = wait_for_response(rx, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ConnectionLost));
    }

    #[tokio::test]
    async fn cancel_removes_without_resolving() {
        let reg = CorrelationRegistry::new();
        let _rx = reg.reserve("r1".into());
        reg.cancel("r1");
        assert!(reg.is_empty());
    }
}
