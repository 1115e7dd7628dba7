use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scope::DEFAULT_ALLOWED_PREFIXES;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "net-scout.json";

/// Top-level device configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScoutConfig {
    pub device_id: Option<String>,
    /// Listen address of the HTTP command API.
    pub bind: String,
    pub scanning: ScanConfig,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            bind: "127.0.0.1:8080".to_string(),
            scanning: ScanConfig::default(),
        }
    }
}

/// Options recognised by the scan pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// Prefixes every requested CIDR range must start with.
    pub allowed_ranges: Vec<String>,
    pub max_duration_secs: u64,
    pub discovery: DiscoveryConfig,
    pub web_probe: WebProbeConfig,
    pub tls: TlsConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            allowed_ranges: DEFAULT_ALLOWED_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_duration_secs: 2 * 60 * 60,
            discovery: DiscoveryConfig::default(),
            web_probe: WebProbeConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl ScanConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryBackend {
    #[default]
    Nmap,
    Connect,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub backend: DiscoveryBackend,
    pub nmap_path: String,
    pub nmap_args: Vec<String>,
    /// Upper bound for one range's discovery call.
    pub range_timeout_secs: u64,
    /// Port list for the connect backend; falls back to the built-in list.
    pub ports_file: Option<PathBuf>,
    pub concurrency: usize,
    pub connect_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backend: DiscoveryBackend::Nmap,
            nmap_path: "nmap".to_string(),
            nmap_args: [
                "-sS",
                "-sV",
                "--version-light",
                "--open",
                "--max-retries",
                "1",
                "--host-timeout",
                "15m",
                "--min-rate",
                "500",
                "--defeat-rst-ratelimit",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            range_timeout_secs: 30 * 60,
            ports_file: None,
            concurrency: 256,
            connect_timeout_ms: 400,
        }
    }
}

impl DiscoveryConfig {
    pub fn range_timeout(&self) -> Duration {
        Duration::from_secs(self.range_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WebProbeConfig {
    pub nikto_path: String,
    pub timeout_secs: u64,
}

impl Default for WebProbeConfig {
    fn default() -> Self {
        Self {
            nikto_path: "nikto".to_string(),
            timeout_secs: 300,
        }
    }
}

impl WebProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    pub connect_timeout_secs: u64,
    /// Certificates with fewer days left than this are reported as expiring soon.
    pub expiry_warning_days: i64,
    /// Discovered service names that are checked for TLS.
    pub services: Vec<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            expiry_warning_days: 30,
            services: vec!["https".into(), "ssl".into(), "tls".into()],
        }
    }
}

impl TlsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Parse a JSON configuration document. Missing keys take their defaults.
pub fn parse_config_str(s: &str) -> Result<ScoutConfig> {
    serde_json::from_str(s).context("invalid configuration JSON")
}

/// Load configuration from `path`, else from [`DEFAULT_CONFIG_FILE`] if it
/// exists, else return the defaults.
pub fn load_config(path: Option<&Path>) -> Result<ScoutConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() {
                p.to_path_buf()
            } else {
                return Ok(ScoutConfig::default());
            }
        }
    };
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config_str(&content).with_context(|| format!("in {}", path.display()))
}
