//! Relay configuration: CLI flags/env vars for runtime settings, plus
//! the on-disk tunnel presets file at `~/.uniroute/tunnels.json`.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::connection::DEFAULT_OUTBOUND_QUEUE_CAPACITY;
use crate::ratelimit::RateLimitConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "uniroute-relay", about = "Reverse tunneling relay server")]
pub struct RelayConfig {
    /// Public domain tunnels are published under, e.g. "example.com"
    /// yields "<subdomain>.example.com".
    #[arg(long, env = "UNIROUTE_DOMAIN", default_value = "tunnel.example.com")]
    pub domain: String,

    /// TCP port the public gateway and control endpoint listen on.
    #[arg(long, env = "UNIROUTE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Shared auth token tunnel clients must present, if set.
    #[arg(long, env = "UNIROUTE_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Maximum control-channel frame size, in bytes.
    #[arg(long, env = "UNIROUTE_MAX_FRAME_SIZE", default_value_t = uniroute_shared::protocol::DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Maximum proxied request/response body size, in bytes.
    #[arg(long, env = "UNIROUTE_MAX_BODY_SIZE", default_value_t = 10 * 1024 * 1024)]
    pub max_body_size: usize,

    /// Outbound queue capacity per tunnel before backpressure kicks in.
    #[arg(long, env = "UNIROUTE_OUTBOUND_QUEUE_CAPACITY", default_value_t = DEFAULT_OUTBOUND_QUEUE_CAPACITY)]
    pub outbound_queue_capacity: usize,

    /// Deadline, in seconds, the gateway waits for an origin response.
    #[arg(long, env = "UNIROUTE_REQUEST_DEADLINE_SECS", default_value_t = 30)]
    pub request_deadline_secs: u64,

    #[arg(long, env = "UNIROUTE_RATELIMIT_PER_MINUTE", default_value_t = 300)]
    pub ratelimit_per_minute: u64,

    #[arg(long, env = "UNIROUTE_RATELIMIT_PER_HOUR", default_value_t = 10_000)]
    pub ratelimit_per_hour: u64,

    #[arg(long, env = "UNIROUTE_RATELIMIT_PER_DAY", default_value_t = 100_000)]
    pub ratelimit_per_day: u64,

    /// Enable the Redis-backed cache/rate-limit backend (requires the
    /// `redis` feature); falls back to the in-memory backend otherwise.
    #[arg(long, env = "UNIROUTE_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Path to the tunnel presets file. Defaults to
    /// `~/.uniroute/tunnels.json` if unset.
    #[arg(long, env = "UNIROUTE_PRESETS_PATH")]
    pub presets_path: Option<PathBuf>,
}

impl RelayConfig {
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            per_minute: self.ratelimit_per_minute,
            per_hour: self.ratelimit_per_hour,
            per_day: self.ratelimit_per_day,
        }
    }

    /// The presets file path to use: the explicit flag/env override if
    /// set, otherwise the default `~/.uniroute/tunnels.json` location.
    pub fn resolved_presets_path(&self) -> Option<PathBuf> {
        self.presets_path.clone().or_else(default_presets_path)
    }
}

/// One saved tunnel preset: a subdomain reservation the operator
/// pre-provisions rather than letting a client claim it on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelPreset {
    pub name: String,
    pub local_url: String,
    pub subdomain: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub rate_limit: Option<PresetRateLimit>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PresetRateLimit {
    pub per_minute: u64,
    pub per_hour: u64,
    pub per_day: u64,
}

impl From<PresetRateLimit> for RateLimitConfig {
    fn from(p: PresetRateLimit) -> Self {
        RateLimitConfig {
            per_minute: p.per_minute,
            per_hour: p.per_hour,
            per_day: p.per_day,
        }
    }
}

/// The on-disk presets document: `{"version":"1.0","tunnels":[...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelPresets {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub tunnels: Vec<TunnelPreset>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for TunnelPresets {
    fn default() -> Self {
        Self {
            version: default_version(),
            tunnels: Vec::new(),
        }
    }
}

/// Default location of the presets file: `~/.uniroute/tunnels.json`.
pub fn default_presets_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".uniroute").join("tunnels.json"))
}

impl TunnelPresets {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist presets to `path`, creating the parent directory with
    /// mode `0755` and writing the file with mode `0600` since it may
    /// carry references to owner tokens.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o755))?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let presets = TunnelPresets {
            version: "1.0".into(),
            tunnels: vec![TunnelPreset {
                name: "demo-api".into(),
                local_url: "http://localhost:8080".into(),
                subdomain: "demo".into(),
                enabled: true,
                rate_limit: None,
            }],
        };
        let dir = std::env::temp_dir().join(format!("uniroute-test-{}", std::process::id()));
        let path = dir.join("tunnels.json");
        presets.save(&path).unwrap();
        let loaded = TunnelPresets::load(&path).unwrap();
        assert_eq!(loaded.version, "1.0");
        assert_eq!(loaded.tunnels.len(), 1);
        assert_eq!(loaded.tunnels[0].subdomain, "demo");
        assert_eq!(loaded.tunnels[0].name, "demo-api");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let presets = TunnelPresets::load(Path::new("/nonexistent/path/tunnels.json")).unwrap();
        assert!(presets.tunnels.is_empty());
    }

    #[test]
    fn enabled_defaults_to_true_and_matches_spec_schema() {
        let json = r#"{"version":"1.0","tunnels":[{"name":"demo-api","local_url":"http://localhost:8080","subdomain":"demo"}]}"#;
        let presets: TunnelPresets = serde_json::from_str(json).unwrap();
        assert!(presets.tunnels[0].enabled);
    }

    #[test]
    fn disabled_presets_are_skipped() {
        let json = r#"{"version":"1.0","tunnels":[{"name":"demo-api","local_url":"http://localhost:8080","subdomain":"demo","enabled":false}]}"#;
        let presets: TunnelPresets = serde_json::from_str(json).unwrap();
        assert!(!presets.tunnels[0].enabled);
    }
}
