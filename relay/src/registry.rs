//! Tunnel registry: subdomain -> live tunnel.
//!
//! Keyed by subdomain, guarded by a single read-write lock — lookups
//! (readers) never block on each other, register/remove (writers) are
//! mutually exclusive with lookups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use uniroute_shared::error::{Error, ErrorKind, Result};
use uniroute_shared::protocol::Frame;

use crate::correlation::CorrelationRegistry;

const RESERVED_WORDS: &[&str] = &["api", "www", "admin", "localhost"];
const MAX_ALLOC_ATTEMPTS: usize = 5;

/// One active tunnel binding. Cheap to clone — the registry and every
/// gateway request handler hold their own `Tunnel` handle, all backed by
/// the same `Arc`-ed inner state.
#[derive(Clone)]
pub struct Tunnel {
    pub id: String,
    pub subdomain: String,
    pub local_url: String,
    pub public_url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    inner: Arc<TunnelInner>,
}

struct TunnelInner {
    outbound: mpsc::Sender<Frame>,
    pending: CorrelationRegistry,
    request_count: AtomicU64,
    last_active_at: std::sync::Mutex<chrono::DateTime<chrono::Utc>>,
}

impl Tunnel {
    pub fn new(
        id: String,
        subdomain: String,
        local_url: String,
        public_url: String,
        outbound: mpsc::Sender<Frame>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            subdomain,
            local_url,
            public_url,
            created_at: now,
            inner: Arc::new(TunnelInner {
                outbound,
                pending: CorrelationRegistry::new(),
                request_count: AtomicU64::new(0),
                last_active_at: std::sync::Mutex::new(now),
            }),
        }
    }

    pub fn pending(&self) -> &CorrelationRegistry {
        &self.inner.pending
    }

    /// Submit a frame to this tunnel's outbound queue, waiting up to
    /// `deadline` for a free slot before reporting `Backpressure`. The
    /// gateway calls this with the request's own remaining deadline so a
    /// momentarily full queue doesn't fail a request that would have
    /// fit once the tunnel client caught up.
    pub async fn submit_with_deadline(&self, frame: Frame, deadline: std::time::Duration) -> Result<()> {
        crate::connection::enqueue_with_deadline(&self.inner.outbound, frame, deadline).await
    }

    pub fn request_count(&self) -> u64 {
        self.inner.request_count.load(Ordering::Relaxed)
    }

    pub fn record_request(&self) {
        self.inner.request_count.fetch_add(1, Ordering::Relaxed);
        *self.inner.last_active_at.lock().unwrap() = chrono::Utc::now();
    }

    pub fn last_active_at(&self) -> chrono::DateTime<chrono::Utc> {
        *self.inner.last_active_at.lock().unwrap()
    }
}

/// Subdomain -> tunnel registry. At most one live tunnel per subdomain.
pub struct TunnelRegistry {
    tunnels: RwLock<HashMap<String, Tunnel>>,
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            tunnels: RwLock::new(HashMap::new()),
        }
    }

    /// Validate a client-requested subdomain against the allowed label
    /// grammar and the reserved-word list.
    pub fn validate_subdomain(candidate: &str) -> Result<()> {
        let re_ok = candidate.len() >= 3
            && candidate.len() <= 63
            && candidate
                .chars()
                .next()
                .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                .unwrap_or(false)
            && candidate
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !re_ok {
            return Err(Error::wire(
                ErrorKind::InvalidSubdomain,
                format!("'{candidate}' does not match the subdomain grammar"),
            ));
        }
        if RESERVED_WORDS.contains(&candidate) {
            return Err(Error::wire(
                ErrorKind::InvalidSubdomain,
                format!("'{candidate}' is a reserved word"),
            ));
        }
        Ok(())
    }

    /// Allocate a subdomain for a new tunnel: use the client's preference
    /// if valid and free, otherwise generate a random 8-char label,
    /// retrying on collision up to `MAX_ALLOC_ATTEMPTS` times.
    pub async fn allocate(&self, preferred: Option<&str>) -> Result<String> {
        if let Some(p) = preferred {
            Self::validate_subdomain(p)?;
            let tunnels = self.tunnels.read().await;
            if !tunnels.contains_key(p) {
                return Ok(p.to_string());
            }
            drop(tunnels);
        }

        for _ in 0..MAX_ALLOC_ATTEMPTS {
            let candidate = random_label();
            let tunnels = self.tunnels.read().await;
            if !tunnels.contains_key(&candidate) {
                return Ok(candidate);
            }
        }

        Err(Error::wire(
            ErrorKind::SubdomainExhausted,
            "failed to allocate a free subdomain after 5 attempts",
        ))
    }

    /// Register `tunnel` under its subdomain. Fails with
    /// `SubdomainTaken` if the subdomain is already live — this backs
    /// up `allocate`'s own check for the rare collision that slips
    /// past it.
    pub async fn register(&self, tunnel: Tunnel) -> Result<()> {
        let mut tunnels = self.tunnels.write().await;
        if tunnels.contains_key(&tunnel.subdomain) {
            return Err(Error::wire(
                ErrorKind::SubdomainTaken,
                format!("subdomain '{}' is already live", tunnel.subdomain),
            ));
        }
        tunnels.insert(tunnel.subdomain.clone(), tunnel);
        Ok(())
    }

    pub async fn lookup(&self, subdomain: &str) -> Option<Tunnel> {
        self.tunnels.read().await.get(subdomain).cloned()
    }

    /// Idempotent: removing a subdomain that isn't present is a no-op.
    pub async fn remove(&self, subdomain: &str) {
        self.tunnels.write().await.remove(subdomain);
    }

    pub async fn list(&self) -> Vec<Tunnel> {
        self.tunnels.read().await.values().cloned().collect()
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Tunnel> {
        self.tunnels.read().await.values().find(|t| t.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.tunnels.read().await.len()
    }
}

fn random_label() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_tunnel(subdomain: &str) -> Tunnel {
        let (tx, _rx) = mpsc::channel(8);
        Tunnel::new(
            "id".into(),
            subdomain.into(),
            "http://localhost:8080".into(),
            format!("https://{subdomain}.example.com"),
            tx,
        )
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let reg = TunnelRegistry::new();
        reg.register(dummy_tunnel("demo")).await.unwrap();
        assert!(reg.lookup("demo").await.is_some());
    }

    #[tokio::test]
    async fn duplicate_subdomain_is_rejected() {
        let reg = TunnelRegistry::new();
        reg.register(dummy_tunnel("demo")).await.unwrap();
        let err = reg.register(dummy_tunnel("demo")).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::SubdomainTaken));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let reg = TunnelRegistry::new();
        reg.remove("nonexistent").await;
        reg.register(dummy_tunnel("demo")).await.unwrap();
        reg.remove("demo").await;
        reg.remove("demo").await;
        assert!(reg.lookup("demo").await.is_none());
    }

    #[test]
    fn subdomain_grammar() {
        assert!(TunnelRegistry::validate_subdomain("abc12345").is_ok());
        assert!(TunnelRegistry::validate_subdomain("ab").is_err()); // too short
        assert!(TunnelRegistry::validate_subdomain("Abcdef").is_err()); // uppercase
        assert!(TunnelRegistry::validate_subdomain("api").is_err()); // reserved
        assert!(TunnelRegistry::validate_subdomain("-abcde").is_err()); // first char must be alnum
    }

    #[tokio::test]
    async fn allocate_falls_back_to_random_on_collision() {
        let reg = TunnelRegistry::new();
        reg.register(dummy_tunnel("taken")).await.unwrap();
        let allocated = reg.allocate(Some("taken")).await.unwrap();
        assert_ne!(allocated, "taken");
    }
}
