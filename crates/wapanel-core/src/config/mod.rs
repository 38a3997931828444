mod defaults;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::PanelError;
use defaults::*;

/// Environment variable holding an explicit backend URL (skips discovery).
pub const ENV_BACKEND_URL: &str = "WAPANEL_BACKEND_URL";

/// Environment variable overriding the port-info document location.
pub const ENV_PORT_INFO: &str = "WAPANEL_PORT_INFO";

/// Top-level wapanel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Client name announced in the realtime connect payload.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Where the backend is expected before discovery runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Initial guess used until discovery confirms something.
    #[serde(default = "default_backend_port")]
    pub default_port: u16,
    /// Explicit backend URL (e.g. `http://127.0.0.1:3001`). When set, discovery
    /// is skipped at startup.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            default_port: default_backend_port(),
            url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Port discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Location of the port-info document: a file path or an `http(s)` URL.
    /// Empty disables the document probe.
    #[serde(default = "default_port_info")]
    pub port_info: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_backend_port")]
    pub base_port: u16,
    /// How many ports after `base_port` are scanned.
    #[serde(default = "default_base_range")]
    pub base_range: u16,
    /// Ports on either side of the last known-good port.
    #[serde(default = "default_window")]
    pub window: u16,
    /// Inclusive `[start, end]` ranges scanned last.
    #[serde(default = "default_legacy_ranges")]
    pub legacy_ranges: Vec<[u16; 2]>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Persist the discovered port so the next start tries it first.
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port_info: default_port_info(),
            health_path: default_health_path(),
            base_port: default_backend_port(),
            base_range: default_base_range(),
            window: default_window(),
            legacy_ranges: default_legacy_ranges(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_rounds: default_max_rounds(),
            retry_delay_ms: default_retry_delay_ms(),
            persist: true,
        }
    }
}

impl DiscoveryConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Realtime channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_socket_path")]
    pub path: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            path: default_socket_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl RealtimeConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Persisted client state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `sqlite` or `memory`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            db_path: default_db_path(),
        }
    }
}

/// Bulk queue tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a completed snapshot stays visible before it is cleared.
    #[serde(default = "default_completion_grace_secs")]
    pub completion_grace_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            completion_grace_secs: default_completion_grace_secs(),
        }
    }
}

impl QueueConfig {
    pub fn completion_grace(&self) -> Duration {
        Duration::from_secs(self.completion_grace_secs)
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist. Environment overrides
/// are applied on top in both cases.
pub fn load(path: &str) -> Result<Config, PanelError> {
    let path = Path::new(path);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PanelError::Config(format!("failed to read {}: {e}", path.display())))?;
        parse(&content)?
    } else {
        info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Parse configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, PanelError> {
    toml::from_str(content).map_err(|e| PanelError::Config(format!("failed to parse config: {e}")))
}

/// Apply environment overrides using the given lookup.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
        config.backend.url = Some(url.trim().to_string());
    }
    if let Some(port_info) = lookup(ENV_PORT_INFO).filter(|v| !v.trim().is_empty()) {
        config.discovery.port_info = port_info.trim().to_string();
    }
}
