//! Async, non-blocking request logging.
//!
//! Every log call pushes onto an mpsc channel drained by a background
//! task that appends to a `RequestLogStore` — so the hot path (the
//! gateway's proxy handler) never blocks on storage I/O.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::store::{RequestLogRecord, RequestLogStore};

const CHANNEL_CAPACITY: usize = 4096;

#[derive(Clone)]
pub struct LogExporter {
    tx: mpsc::Sender<RequestLogRecord>,
}

impl LogExporter {
    /// Spawn the background writer task and return the handle used to
    /// submit entries. `store` is the persistence seam the writer
    /// drains into.
    pub fn spawn(store: Arc<dyn RequestLogStore>) -> Self {
        let (tx, mut rx) = mpsc::channel::<RequestLogRecord>(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if entry.status >= 500 {
                    warn!(
                        tunnel_id = %entry.tunnel_id,
                        status = entry.status,
                        path = %entry.path,
                        "request completed with server error"
                    );
                } else {
                    info!(
                        tunnel_id = %entry.tunnel_id,
                        status = entry.status,
                        method = %entry.method,
                        path = %entry.path,
                        duration_ms = entry.duration_ms,
                        "request completed"
                    );
                }
                if let Err(e) = store.append(entry).await {
                    warn!("failed to persist request log entry: {e}");
                }
            }
        });
        Self { tx }
    }

    /// Submit an entry for logging. Uses `try_send` so a saturated
    /// channel (the writer task falling behind) drops the log entry
    /// rather than blocking the request path — logging must never add
    /// latency to a tunnelled request.
    pub fn log(&self, entry: RequestLogRecord) {
        if self.tx.try_send(entry).is_err() {
            warn!("log export channel full, dropping entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRequestLogStore;

    #[tokio::test]
    async fn logged_entries_reach_the_store() {
        let store = Arc::new(InMemoryRequestLogStore::default());
        let exporter = LogExporter::spawn(store.clone());
        exporter.log(RequestLogRecord {
            tunnel_id: "t1".into(),
            request_id: "r1".into(),
            method: "GET".into(),
            path: "/".into(),
            status: 200,
            duration_ms: 5,
            timestamp: chrono::Utc::now(),
        });
        // give the background task a chance to drain
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let recent = store.recent_for_tunnel("t1", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
    }
}
