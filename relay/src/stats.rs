//! Per-tunnel request counters and latency percentiles.
//!
//! One ring buffer per tunnel (cap 1000 samples, most-recent-first)
//! instead of a single relay-wide histogram, since the admin surface
//! reports stats per tunnel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

pub const LATENCY_SAMPLE_CAP: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct TunnelStatsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Most-recent-first ring of up to `LATENCY_SAMPLE_CAP` latency
/// samples, in milliseconds.
struct LatencyRing {
    samples: Vec<u64>,
    pos: usize,
    filled: bool,
}

impl LatencyRing {
    fn new() -> Self {
        Self {
            samples: vec![0; LATENCY_SAMPLE_CAP],
            pos: 0,
            filled: false,
        }
    }

    fn push(&mut self, latency_ms: u64) {
        self.samples[self.pos] = latency_ms;
        self.pos = (self.pos + 1) % self.samples.len();
        if self.pos == 0 {
            self.filled = true;
        }
    }

    fn percentiles(&self) -> (u64, u64, u64, u64) {
        let len = if self.filled {
            self.samples.len()
        } else {
            self.pos
        };
        if len == 0 {
            return (0, 0, 0, 0);
        }
        let mut sorted = self.samples[..len].to_vec();
        sorted.sort_unstable();
        let at = |p: f64| sorted[((len as f64 * p / 100.0) as usize).min(len - 1)];
        (at(50.0), at(90.0), at(95.0), at(99.0))
    }
}

struct TunnelCounters {
    requests: u64,
    errors: u64,
    bytes_in: u64,
    bytes_out: u64,
    latencies: LatencyRing,
}

impl TunnelCounters {
    fn new() -> Self {
        Self {
            requests: 0,
            errors: 0,
            bytes_in: 0,
            bytes_out: 0,
            latencies: LatencyRing::new(),
        }
    }
}

/// Collects per-tunnel request stats. Holds one `Mutex`-guarded map
/// rather than a `DashMap` because every recording also needs to push
/// into the tunnel's latency ring, an operation that reads-then-writes
/// and is simplest to keep atomic under one lock per tunnel entry.
#[derive(Clone)]
pub struct StatsObserver {
    inner: Arc<Mutex<HashMap<String, TunnelCounters>>>,
}

impl Default for StatsObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsObserver {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record one completed request. `resolved_by_response` distinguishes
    /// a genuine origin `Frame::Response` from anything else the request
    /// was resolved with (rate limiting, backpressure, a timeout, a
    /// dropped connection): an outcome is an error if the status is a
    /// server error, or if it never got a real response at all, even
    /// when the status synthesized for it happens to be below 500.
    pub async fn record(
        &self,
        tunnel_id: &str,
        status: u16,
        latency_ms: u64,
        bytes_in: u64,
        bytes_out: u64,
        resolved_by_response: bool,
    ) {
        let mut map = self.inner.lock().await;
        let entry = map
            .entry(tunnel_id.to_string())
            .or_insert_with(TunnelCounters::new);
        entry.requests += 1;
        if status >= 500 || !resolved_by_response {
            entry.errors += 1;
        }
        entry.bytes_in += bytes_in;
        entry.bytes_out += bytes_out;
        entry.latencies.push(latency_ms);
    }

    pub async fn snapshot(&self, tunnel_id: &str) -> Option<TunnelStatsSnapshot> {
        let map = self.inner.lock().await;
        map.get(tunnel_id).map(|c| {
            let (p50, p90, p95, p99) = c.latencies.percentiles();
            TunnelStatsSnapshot {
                requests: c.requests,
                errors: c.errors,
                bytes_in: c.bytes_in,
                bytes_out: c.bytes_out,
                p50_ms: p50,
                p90_ms: p90,
                p95_ms: p95,
                p99_ms: p99,
            }
        })
    }

    pub async fn remove(&self, tunnel_id: &str) {
        self.inner.lock().await.remove(tunnel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_snapshots() {
        let stats = StatsObserver::new();
        stats.record("t1", 200, 10, 100, 200, true).await;
        stats.record("t1", 500, 20, 50, 0, true).await;
        let snap = stats.snapshot("t1").await.unwrap();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.bytes_in, 150);
    }

    #[tokio::test]
    async fn client_error_status_is_not_counted_as_error() {
        let stats = StatsObserver::new();
        stats.record("t1", 404, 5, 0, 0, true).await;
        let snap = stats.snapshot("t1").await.unwrap();
        assert_eq!(snap.errors, 0);
    }

    #[tokio::test]
    async fn non_response_resolution_counts_as_error_even_below_500() {
        let stats = StatsObserver::new();
        stats.record("t1", 200, 5, 0, 0, false).await;
        let snap = stats.snapshot("t1").await.unwrap();
        assert_eq!(snap.errors, 1);
    }

    #[tokio::test]
    async fn unknown_tunnel_has_no_snapshot() {
        let stats = StatsObserver::new();
        assert!(stats.snapshot("nope").await.is_none());
    }

    #[tokio::test]
    async fn percentiles_over_cap_stay_bounded() {
        let stats = StatsObserver::new();
        for i in 0..(LATENCY_SAMPLE_CAP * 2) {
            stats.record("t1", 200, i as u64, 0, 0, true).await;
        }
        let snap = stats.snapshot("t1").await.unwrap();
        assert_eq!(snap.requests, (LATENCY_SAMPLE_CAP * 2) as u64);
        assert!(snap.p99_ms >= snap.p50_ms);
    }
}
