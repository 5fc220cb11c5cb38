//! Sliding-window rate limiting, three windows per tunnel: minute,
//! hour, day.
//!
//! Each window is a counter in the cache backend keyed by
//! `tunnel:ratelimit:{tunnel_id}:{window}:{index}`, where `index` is the
//! window start truncated to the window length — an
//! atomic-increment-with-TTL counter rather than a true sliding log,
//! trading exactness for bounded memory. A cache backend error fails
//! OPEN: a burst that can't be counted is let through rather than
//! rejected, since the alternative
//! (treat a backend hiccup as "over limit") takes every tunnel down
//! with it.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::CacheBackend;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub per_minute: u64,
    pub per_hour: u64,
    pub per_day: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 300,
            per_hour: 10_000,
            per_day: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    fn duration(self) -> Duration {
        match self {
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(3600),
            Window::Day => Duration::from_secs(86_400),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }

    /// The current bucket index for this window: wall-clock time
    /// truncated to the window length, so every request within the same
    /// window period maps to the same counter key.
    fn index(self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now / self.duration().as_secs()
    }
}

/// Build the cache key for `tunnel_id`'s counter in `window`, per the
/// documented key contract `tunnel:ratelimit:{id}:{minute|hour|day}:{index}`.
fn cache_key(tunnel_id: &str, window: Window) -> String {
    format!("tunnel:ratelimit:{tunnel_id}:{}:{}", window.label(), window.index())
}

pub struct RateLimiter {
    backend: Arc<dyn CacheBackend>,
    default_config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn CacheBackend>, default_config: RateLimitConfig) -> Self {
        Self {
            backend,
            default_config,
        }
    }

    /// Check and record one request against `tunnel_id`'s windows,
    /// using `override_config` if the tunnel was provisioned with one.
    /// Returns the exceeded window, if any, for the caller to turn into
    /// a 429 naming which limit tripped.
    pub async fn check(
        &self,
        tunnel_id: &str,
        override_config: Option<RateLimitConfig>,
    ) -> Option<Window> {
        let config = override_config.unwrap_or(self.default_config);
        let checks = [
            (Window::Minute, config.per_minute),
            (Window::Hour, config.per_hour),
            (Window::Day, config.per_day),
        ];

        let mut exceeded = None;
        for (window, limit) in checks {
            let key = cache_key(tunnel_id, window);
            // Every window is incremented regardless of whether an
            // earlier window already tripped, so all three counters
            // stay accurate for the caller's own observability.
            let count = match self.backend.incr(&key, window.duration()).await {
                Ok(c) => c,
                Err(_) => continue, // fail open: backend error doesn't count against the tunnel
            };
            if count > limit && exceeded.is_none() {
                exceeded = Some(window);
            }
        }
        exceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;

    #[tokio::test]
    async fn under_limit_passes() {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCacheBackend::new()),
            RateLimitConfig {
                per_minute: 5,
                per_hour: 100,
                per_day: 1000,
            },
        );
        for _ in 0..5 {
            assert!(limiter.check("t1", None).await.is_none());
        }
    }

    #[tokio::test]
    async fn exceeding_minute_window_trips() {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCacheBackend::new()),
            RateLimitConfig {
                per_minute: 2,
                per_hour: 100,
                per_day: 1000,
            },
        );
        assert!(limiter.check("t1", None).await.is_none());
        assert!(limiter.check("t1", None).await.is_none());
        assert_eq!(limiter.check("t1", None).await, Some(Window::Minute));
    }

    /// Pinned behavior: once a window is over its limit the counter
    /// keeps incrementing rather than being rolled back to the limit.
    /// A later request in the same bucket sees the true overshoot, not
    /// a value clamped back down to the threshold.
    #[tokio::test]
    async fn overshoot_is_not_rolled_back() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let limiter = RateLimiter::new(
            backend.clone(),
            RateLimitConfig {
                per_minute: 1,
                per_hour: 100,
                per_day: 1000,
            },
        );
        limiter.check("t1", None).await;
        limiter.check("t1", None).await;
        limiter.check("t1", None).await;
        let key = cache_key("t1", Window::Minute);
        let count = backend.get(&key).await.unwrap().unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn cache_key_matches_the_documented_contract() {
        let key = cache_key("t1", Window::Minute);
        assert!(key.starts_with("tunnel:ratelimit:t1:minute:"));
    }

    #[tokio::test]
    async fn per_tunnel_override_is_respected() {
        let limiter = RateLimiter::new(
            Arc::new(InMemoryCacheBackend::new()),
            RateLimitConfig {
                per_minute: 1,
                per_hour: 1,
                per_day: 1,
            },
        );
        let generous = RateLimitConfig {
            per_minute: 1000,
            per_hour: 1000,
            per_day: 1000,
        };
        for _ in 0..10 {
            assert!(limiter.check("t1", Some(generous)).await.is_none());
        }
    }
}
