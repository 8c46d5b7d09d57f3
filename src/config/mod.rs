//! Runtime configuration.
//!
//! Values are resolved in layers: built-in defaults, then an optional TOML
//! file, then `PAGECAST_*` environment variables, then CLI flags (applied by
//! the binary).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

#[cfg(test)]
mod tests;

/// Tag emitted by current builds of the observed app
pub const CURRENT_TAG: &str = "OptimizedCarrefour";
/// Tag emitted by earlier builds
pub const LEGACY_TAG: &str = "CrossAppTracking";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Default log filter when neither `-v` nor `RUST_LOG` is given
    #[serde(default)]
    pub log_level: Option<String>,
}

/// HTTP collector that receives completed pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_collector_url")]
    pub base_url: String,

    /// Upper bound for a single delivery request
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_collector_url(),
            timeout: default_request_timeout(),
        }
    }
}

/// Realtime broadcast endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_hub_host")]
    pub host: String,

    #[serde(default = "default_hub_port")]
    pub port: u16,

    /// Messages buffered per subscriber before it is considered stalled
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_hub_host(),
            port: default_hub_port(),
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_adb_path")]
    pub adb_path: String,

    /// Log tags to capture; every tag is passed to logcat and accepted by the parser
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,

    /// Timeout for one-shot device queries (`adb devices`, `getprop`)
    #[serde(with = "humantime_serde", default = "default_query_timeout")]
    pub query_timeout: Duration,

    /// How often to look for newly attached devices; zero disables re-discovery
    #[serde(with = "humantime_serde", default = "default_discovery_interval")]
    pub discovery_interval: Duration,

    /// Time a log stream gets to exit after SIGTERM before it is killed
    #[serde(with = "humantime_serde", default = "default_close_grace")]
    pub close_grace: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            tags: default_tags(),
            query_timeout: default_query_timeout(),
            discovery_interval: default_discovery_interval(),
            close_grace: default_close_grace(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Wait applied to pages opened by a marker token before a short page is emitted
    #[serde(with = "humantime_serde", default = "default_short_page_grace")]
    pub short_page_grace: Duration,

    /// Captures with this many characters or fewer are discarded
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    /// Deliver captures without a content marker as documents
    #[serde(default)]
    pub unmarked_as_document: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            short_page_grace: default_short_page_grace(),
            min_content_chars: default_min_content_chars(),
            unmarked_as_document: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Pending deliveries kept per device; the oldest is dropped when full
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_collector_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_hub_host() -> String {
    "localhost".to_string()
}

fn default_hub_port() -> u16 {
    8765
}

fn default_subscriber_queue() -> usize {
    16
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_tags() -> Vec<String> {
    vec![CURRENT_TAG.to_string(), LEGACY_TAG.to_string()]
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_discovery_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_close_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_short_page_grace() -> Duration {
    Duration::from_millis(500)
}

fn default_min_content_chars() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    32
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `path` (if it exists), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::debug!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an environment lookup function
    pub fn merge_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PAGECAST_COLLECTOR_URL") {
            self.collector.base_url = url;
        }

        if let Some(host) = lookup("PAGECAST_HUB_HOST") {
            self.hub.host = host;
        }

        if let Some(port) = lookup("PAGECAST_HUB_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.hub.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PAGECAST_HUB_PORT: {}", port),
            }
        }

        if let Some(tags) = lookup("PAGECAST_TAGS") {
            self.device.tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(level) = lookup("PAGECAST_LOG_LEVEL") {
            self.log_level = Some(level);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.tags.is_empty() {
            return Err(Error::Config("at least one log tag is required".into()));
        }

        if let Some(tag) = self.device.tags.iter().find(|t| t.contains(char::is_whitespace)) {
            return Err(Error::Config(format!("log tag '{tag}' contains whitespace")));
        }

        if self.delivery.queue_capacity == 0 {
            return Err(Error::Config("delivery.queue_capacity must be at least 1".into()));
        }

        if self.hub.subscriber_queue == 0 {
            return Err(Error::Config("hub.subscriber_queue must be at least 1".into()));
        }

        if self.collector.enabled {
            let url = url::Url::parse(&self.collector.base_url).map_err(|e| {
                Error::Config(format!(
                    "invalid collector URL '{}': {e}",
                    self.collector.base_url
                ))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::Config(format!(
                    "collector URL must be http(s), got '{}'",
                    url.scheme()
                )));
            }
        }

        Ok(())
    }
}
