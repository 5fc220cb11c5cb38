//! Configuration file parser for the tunnel client.
//!
//! Supports `uniroute.yml`: a relay URL, an optional auth token, and the
//! single tunnel definition this client process drives (the wire
//! protocol carries one `local_url` per control connection, so one
//! client process owns exactly one tunnel).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root configuration for a tunnel client invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnirouteConfig {
    /// Relay control endpoint, e.g. `wss://tunnel.example.com/tunnel`.
    #[serde(default = "default_relay")]
    pub relay: String,

    /// Optional authentication token presented in the `init` frame.
    pub auth_token: Option<String>,

    /// Local hostname to forward to.
    #[serde(default = "default_host")]
    pub local_host: String,

    /// Local port to forward traffic to.
    pub local_port: u16,

    /// Optional preferred subdomain.
    pub subdomain: Option<String>,
}

fn default_relay() -> String {
    "ws://localhost:8080/tunnel".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl UnirouteConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: UnirouteConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.local_port == 0 {
            anyhow::bail!("invalid local_port 0 in configuration");
        }
        if let Some(sub) = &self.subdomain {
            if sub.is_empty() {
                anyhow::bail!("subdomain, if set, must not be empty");
            }
        }
        Ok(())
    }

    /// The local origin URL this client forwards requests to.
    pub fn local_url(&self) -> String {
        format!("http://{}:{}", self.local_host, self.local_port)
    }

    /// Search for a config file in standard locations: the current
    /// directory, then the user's home directory.
    pub fn find_config() -> Option<PathBuf> {
        let candidates = ["uniroute.yml", "uniroute.yaml", ".uniroute.yml", ".uniroute.yaml"];

        for name in &candidates {
            let path = PathBuf::from(name);
            if path.exists() {
                return Some(path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            for name in &candidates {
                let path = home.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
relay: wss://tunnel.example.com/tunnel
auth_token: "test-token"
local_port: 3000
subdomain: my-api
"#;
        let config: UnirouteConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.local_port, 3000);
        assert_eq!(config.subdomain.as_deref(), Some("my-api"));
        assert_eq!(config.local_url(), "http://127.0.0.1:3000");
    }

    #[test]
    fn rejects_port_zero() {
        let config = UnirouteConfig {
            relay: default_relay(),
            auth_token: None,
            local_host: default_host(),
            local_port: 0,
            subdomain: None,
        };
        assert!(config.validate().is_err());
    }
}
