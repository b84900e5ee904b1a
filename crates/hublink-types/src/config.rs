//! Node configuration, loaded from `~/.hublink/config.toml` with defaults.
//!
//! Every field has a default, so an empty or partial file is valid. A file
//! that is missing or fails to parse is logged and replaced by
//! [`HubConfig::default`]; configuration problems never stop a node.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Port of the local hub when no endpoint is configured.
pub const DEFAULT_PORT: u16 = 1997;

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Full WebSocket URL of the hub. Takes precedence over `port`.
    pub endpoint: Option<String>,
    /// Loopback port used when `endpoint` is unset.
    pub port: u16,
    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,
    /// Reconnect backoff settings.
    pub reconnect: ReconnectConfig,
    /// Connect-time authentication.
    pub auth: AuthConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            reconnect: ReconnectConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl HubConfig {
    /// The WebSocket URL this node connects to.
    pub fn url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => endpoint.trim().to_string(),
            _ => format!("ws://127.0.0.1:{}", self.port),
        }
    }
}

/// Linear reconnect backoff: the delay before a retry is
/// `(consecutive failures - 1) * unit`, optionally capped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Length of one backoff step in milliseconds.
    pub unit_ms: u64,
    /// Upper bound on a single delay in milliseconds. `0` disables the cap.
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            unit_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl ReconnectConfig {
    /// One backoff step.
    pub fn unit(&self) -> Duration {
        Duration::from_millis(self.unit_ms)
    }

    /// The delay cap, if any.
    pub fn max_delay(&self) -> Option<Duration> {
        (self.max_delay_ms > 0).then(|| Duration::from_millis(self.max_delay_ms))
    }
}

/// Connect-time authentication settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Attach a signed `Authorization` header when connecting.
    pub enabled: bool,
    /// Location of the Ed25519 key file. Defaults to `~/.hublink/ed25519.key`.
    pub key_path: Option<PathBuf>,
}

impl AuthConfig {
    /// The key file this node signs with.
    pub fn key_path(&self) -> PathBuf {
        self.key_path
            .clone()
            .unwrap_or_else(|| hublink_home().join("ed25519.key"))
    }
}

/// Load configuration from a TOML file, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> HubConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return HubConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<HubConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                HubConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            HubConfig::default()
        }
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    hublink_home().join("config.toml")
}

/// Get the HubLink home directory.
pub fn hublink_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".hublink")
}
