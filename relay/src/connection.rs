//! The tunnel connection state machine and its keepalive discipline.
//!
//! A connection owns exactly one writer task (draining the outbound
//! queue to the socket) and one reader task (decoding frames off the
//! socket). Backpressure on the outbound queue surfaces as a
//! `Backpressure` error to the caller rather than growing the queue
//! unbounded.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uniroute_shared::error::{Error, ErrorKind, Result};
use uniroute_shared::protocol::Frame;

pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const KEEPALIVE_PING_INTERVAL: Duration = Duration::from_secs(30);
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    New = 0,
    Active = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::New,
            1 => ConnectionState::Active,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared state tracked for one tunnel's control-channel connection.
/// `Tunnel` (registry.rs) embeds the outbound sender this produces;
/// this type owns the transition logic and last-pong bookkeeping that
/// the socket-handling tasks in control.rs drive.
pub struct ConnectionGuard {
    state: AtomicU8,
}

impl Default for ConnectionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionGuard {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::New as u8),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// NEW -> ACTIVE, once the init/tunnel_created handshake completes.
    pub fn activate(&self) {
        self.state
            .store(ConnectionState::Active as u8, Ordering::Release);
    }

    /// ACTIVE or NEW -> CLOSED. Idempotent — closing twice is a no-op,
    /// since both the reader loop's exit and the writer loop's send
    /// failure can race to close the same connection.
    pub fn close(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }
}

/// Create the bounded outbound channel a new `Tunnel` is constructed
/// with. Capacity is fixed at `DEFAULT_OUTBOUND_QUEUE_CAPACITY` unless
/// overridden by relay configuration.
pub fn outbound_channel(capacity: usize) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
    mpsc::channel(capacity)
}

/// Submit a frame to a tunnel's outbound queue, waiting up to `deadline`
/// for a free slot instead of failing the instant the queue is
/// momentarily full. A request should only see `Backpressure` once it
/// has genuinely waited out its own deadline, not on the first transient
/// full queue.
pub async fn enqueue_with_deadline(tx: &mpsc::Sender<Frame>, frame: Frame, deadline: Duration) -> Result<()> {
    match tokio::time::timeout(deadline, tx.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(Error::wire(ErrorKind::ConnectionLost, "tunnel connection is closed")),
        Err(_) => Err(Error::wire(ErrorKind::Backpressure, "tunnel outbound queue stayed full for the request's deadline")),
    }
}

/// Tracks the most recent pong (or any inbound traffic) for keepalive
/// timeout detection. Wrapped in `Arc` so the reader and the keepalive
/// ticker, running as separate `select!` arms on the same task, can
/// both touch it without a channel.
#[derive(Clone)]
pub struct LastSeen(Arc<std::sync::Mutex<std::time::Instant>>);

impl Default for LastSeen {
    fn default() -> Self {
        Self::new()
    }
}

impl LastSeen {
    pub fn new() -> Self {
        Self(Arc::new(std::sync::Mutex::new(std::time::Instant::now())))
    }

    pub fn touch(&self) {
        *self.0.lock().unwrap() = std::time::Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.0.lock().unwrap().elapsed()
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.elapsed() >= timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions() {
        let guard = ConnectionGuard::new();
        assert_eq!(guard.state(), ConnectionState::New);
        guard.activate();
        assert_eq!(guard.state(), ConnectionState::Active);
        guard.close();
        assert_eq!(guard.state(), ConnectionState::Closed);
        // closing twice is a no-op, not a panic
        guard.close();
        assert!(guard.is_closed());
    }

    #[tokio::test]
    async fn deadline_enqueue_succeeds_once_a_slot_frees_up() {
        let (tx, mut rx) = outbound_channel(1);
        tx.try_send(Frame::Ping).unwrap(); // fill the only slot
        let tx2 = tx.clone();
        let waiter = tokio::spawn(async move {
            enqueue_with_deadline(&tx2, Frame::Ping, Duration::from_secs(1)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        rx.recv().await.unwrap(); // frees the slot
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn deadline_enqueue_times_out_as_backpressure() {
        let (tx, _rx) = outbound_channel(1);
        tx.try_send(Frame::Ping).unwrap();
        let err = enqueue_with_deadline(&tx, Frame::Ping, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Backpressure));
    }

    #[tokio::test]
    async fn deadline_enqueue_reports_connection_lost_on_closed_queue() {
        let (tx, rx) = outbound_channel(1);
        drop(rx);
        let err = enqueue_with_deadline(&tx, Frame::Ping, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ConnectionLost));
    }

    #[test]
    fn last_seen_tracks_staleness() {
        let seen = LastSeen::new();
        assert!(!seen.is_stale(Duration::from_secs(60)));
        seen.touch();
        assert!(!seen.is_stale(Duration::from_millis(1)) || seen.elapsed() < Duration::from_secs(1));
    }
}
