//! Persistence seams.
//!
//! Durable storage (tunnels, tokens, sessions, request logs) is framed
//! as an external collaborator: the relay core only ever talks to
//! these traits, never to a concrete database client. The in-memory
//! implementations here are the default (and what the test suite
//! exercises); a real deployment wires in its own `sqlx`/whatever-backed
//! implementation at the composition root in `main.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct TunnelRecord {
    pub id: String,
    pub subdomain: String,
    pub owner_token_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub id: String,
    pub token_hash: String,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub tunnel_id: String,
    pub status: SessionStatus,
    pub opened_at: chrono::DateTime<chrono::Utc>,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone)]
pub struct RequestLogRecord {
    pub tunnel_id: String,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[async_trait::async_trait]
pub trait TunnelStore: Send + Sync {
    async fn create(&self, record: TunnelRecord) -> anyhow::Result<()>;
    /// Bump last-activity bookkeeping for `id`; a no-op if `id` isn't known.
    async fn touch(&self, id: &str) -> anyhow::Result<()>;
    async fn remove(&self, id: &str) -> anyhow::Result<()>;
    async fn list(&self) -> anyhow::Result<Vec<TunnelRecord>>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<TunnelRecord>>;
}

#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, record: TokenRecord) -> anyhow::Result<()>;
    async fn find_by_hash(&self, token_hash: &str) -> anyhow::Result<Option<TokenRecord>>;
    async fn all(&self) -> anyhow::Result<Vec<TokenRecord>>;
    async fn revoke(&self, id: &str) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn open(&self, record: SessionRecord) -> anyhow::Result<()>;
    /// Update a session's status by id. `status` and `session_id` are
    /// taken as two independent parameters — never collapsed into one
    /// formatted string — so a backing SQL implementation binds them as
    /// separate placeholders rather than interpolating either into the
    /// query text.
    async fn update_status(&self, session_id: &str, status: SessionStatus) -> anyhow::Result<()>;
    async fn get(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>>;
    async fn list_for_tunnel(&self, tunnel_id: &str) -> anyhow::Result<Vec<SessionRecord>>;
}

#[async_trait::async_trait]
pub trait RequestLogStore: Send + Sync {
    async fn append(&self, record: RequestLogRecord) -> anyhow::Result<()>;
    async fn recent_for_tunnel(&self, tunnel_id: &str, limit: usize) -> anyhow::Result<Vec<RequestLogRecord>>;
}

#[derive(Default)]
pub struct InMemoryTunnelStore {
    rows: Arc<RwLock<HashMap<String, TunnelRecord>>>,
}

#[async_trait::async_trait]
impl TunnelStore for InMemoryTunnelStore {
    async fn create(&self, record: TunnelRecord) -> anyhow::Result<()> {
        self.rows.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn touch(&self, id: &str) -> anyhow::Result<()> {
        // created_at is immutable once set; last-activity tracking
        // lives in stats.rs, so this only needs to exist to satisfy the
        // trait contract for stores that do track it themselves.
        let _ = self.rows.read().await.get(id);
        Ok(())
    }

    async fn remove(&self, id: &str) -> anyhow::Result<()> {
        self.rows.write().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<TunnelRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<TunnelRecord>> {
        Ok(self.rows.read().await.get(id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryTokenStore {
    rows: Arc<RwLock<HashMap<String, TokenRecord>>>,
}

#[async_trait::async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, record: TokenRecord) -> anyhow::Result<()> {
        self.rows.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> anyhow::Result<Option<TokenRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn all(&self) -> anyhow::Result<Vec<TokenRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn revoke(&self, id: &str) -> anyhow::Result<()> {
        self.rows.write().await.remove(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    rows: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn open(&self, record: SessionRecord) -> anyhow::Result<()> {
        self.rows.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_status(&self, session_id: &str, status: SessionStatus) -> anyhow::Result<()> {
        let mut rows = self.rows.write().await;
        if let Some(record) = rows.get_mut(session_id) {
            record.status = status;
            if status == SessionStatus::Closed {
                record.closed_at = Some(chrono::Utc::now());
            }
        }
        Ok(())
    }

    async fn get(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.rows.read().await.get(session_id).cloned())
    }

    async fn list_for_tunnel(&self, tunnel_id: &str) -> anyhow::Result<Vec<SessionRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|s| s.tunnel_id == tunnel_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryRequestLogStore {
    rows: Arc<RwLock<Vec<RequestLogRecord>>>,
}

#[async_trait::async_trait]
impl RequestLogStore for InMemoryRequestLogStore {
    async fn append(&self, record: RequestLogRecord) -> anyhow::Result<()> {
        self.rows.write().await.push(record);
        Ok(())
    }

    async fn recent_for_tunnel(&self, tunnel_id: &str, limit: usize) -> anyhow::Result<Vec<RequestLogRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .filter(|r| r.tunnel_id == tunnel_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_status_update_is_independent_of_id() {
        let store = InMemorySessionStore::default();
        let now = chrono::Utc::now();
        store
            .open(SessionRecord {
                id: "s1".into(),
                tunnel_id: "t1".into(),
                status: SessionStatus::Open,
                opened_at: now,
                closed_at: None,
            })
            .await
            .unwrap();
        store.update_status("s1", SessionStatus::Closed).await.unwrap();
        let record = store.get("s1").await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Closed);
        assert!(record.closed_at.is_some());
    }

    #[tokio::test]
    async fn request_log_is_most_recent_first() {
        let store = InMemoryRequestLogStore::default();
        for i in 0..3 {
            store
                .append(RequestLogRecord {
                    tunnel_id: "t1".into(),
                    request_id: format!("r{i}"),
                    method: "GET".into(),
                    path: "/".into(),
                    status: 200,
                    duration_ms: 1,
                    timestamp: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }
        let recent = store.recent_for_tunnel("t1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "r2");
    }
}
