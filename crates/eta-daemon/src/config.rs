//! Configuration loading and validation

use anyhow::{Context, Result};
use eta_client::ClientConfig;
use eta_discovery::{ConcurrencyLimit, RefreshMode, ScannerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// The controller to talk to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Treat the device as API 1.1 even if it reports a newer version
    #[serde(default)]
    pub force_legacy_mode: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            force_legacy_mode: false,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "192.168.0.25".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Parallel requests against the controller: 1, 2, 3, 5, 8, 10 or 15
    #[serde(default)]
    pub max_parallel_requests: ConcurrencyLimit,
    /// What the periodic scan does
    #[serde(default)]
    pub refresh_mode: RefreshMode,
    /// Periodic scan interval in seconds (0 disables it)
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_error_poll_interval")]
    pub error_poll_interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_parallel_requests: ConcurrencyLimit::default(),
            refresh_mode: RefreshMode::default(),
            scan_interval_secs: default_scan_interval(),
            error_poll_interval_secs: default_error_poll_interval(),
        }
    }
}

fn default_scan_interval() -> u64 {
    60
}

fn default_error_poll_interval() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the API server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Where known assignments are kept between runs
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            store_path: default_store_path(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./etad-assignments.json")
}

impl Config {
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.device.host.clone(),
            port: self.device.port,
            request_timeout: Duration::from_secs(self.device.request_timeout_secs.max(1)),
            force_legacy_mode: self.device.force_legacy_mode,
            max_parallel_requests: self.discovery.max_parallel_requests.get(),
        }
    }

    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            concurrency: self.discovery.max_parallel_requests,
        }
    }

    pub fn error_poll_interval(&self) -> Duration {
        Duration::from_secs(self.discovery.error_poll_interval_secs.max(1))
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
