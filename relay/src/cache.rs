//! Pluggable counter backend for the rate limiter and the stats mirror.
//!
//! `InMemoryCacheBackend` is the default — a `DashMap` of counters with
//! lazily-checked TTLs, good for a single relay instance or tests. The
//! optional `redis` feature swaps in a `fred`-backed client for a
//! shared backend across relay instances.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Atomic-increment-with-TTL counter store. Every rate-limit window and
/// the optional stats mirror go through this trait so the backend can
/// be swapped without touching call sites.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Increment `key` by 1, creating it with `ttl` if absent, and
    /// return the post-increment value. Implementations must not roll
    /// the increment back if the caller later decides the limit was
    /// exceeded — the overshoot itself is kept, by design, so that a
    /// burst just over the line is remembered rather than erased.
    async fn incr(&self, key: &str, ttl: Duration) -> anyhow::Result<u64>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<u64>>;

    async fn set_string(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;

    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>>;
}

struct Counter {
    value: u64,
    expires_at: Instant,
}

/// Default, zero-dependency backend. Good enough for a single relay
/// instance or tests; a multi-instance deployment should enable the
/// `redis` feature instead.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    counters: DashMap<String, Counter>,
    strings: DashMap<String, (String, Instant)>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn incr(&self, key: &str, ttl: Duration) -> anyhow::Result<u64> {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert_with(|| Counter {
            value: 0,
            expires_at: now + ttl,
        });
        if entry.expires_at <= now {
            entry.value = 0;
            entry.expires_at = now + ttl;
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<u64>> {
        let now = Instant::now();
        match self.counters.get(key) {
            Some(c) if c.expires_at > now => Ok(Some(c.value)),
            _ => Ok(None),
        }
    }

    async fn set_string(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        self.strings
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        match self.strings.get(key) {
            Some(entry) if entry.1 > now => Ok(Some(entry.0.clone())),
            _ => Ok(None),
        }
    }
}

#[cfg(feature = "redis")]
pub struct RedisCacheBackend {
    client: fred::clients::RedisClient,
}

#[cfg(feature = "redis")]
impl RedisCacheBackend {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        use fred::prelude::*;
        let config = RedisConfig::from_url(url)?;
        let client = Builder::from_config(config).build()?;
        client.init().await?;
        Ok(Self { client })
    }
}

#[cfg(feature = "redis")]
#[async_trait::async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn incr(&self, key: &str, ttl: Duration) -> anyhow::Result<u64> {
        use fred::prelude::*;
        let value: u64 = self.client.incr(key).await?;
        if value == 1 {
            let _: () = self.client.expire(key, ttl.as_secs() as i64).await?;
        }
        Ok(value)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<u64>> {
        use fred::prelude::*;
        let value: Option<u64> = self.client.get(key).await?;
        Ok(value)
    }

    async fn set_string(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        use fred::prelude::*;
        let _: () = self
            .client
            .set(key, value, Some(Expiration::EX(ttl.as_secs() as i64)), None, false)
            .await?;
        Ok(())
    }

    async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        use fred::prelude::*;
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_creates_and_increments() {
        let cache = InMemoryCacheBackend::new();
        assert_eq!(cache.incr("k", Duration::from_secs(60)).await.unwrap(), 1);
        assert_eq!(cache.incr("k", Duration::from_secs(60)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn expired_counter_resets() {
        let cache = InMemoryCacheBackend::new();
        cache.incr("k", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.incr("k", Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_returns_none_after_expiry() {
        let cache = InMemoryCacheBackend::new();
        cache.incr("k", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
