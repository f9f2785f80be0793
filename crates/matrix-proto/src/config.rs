use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::marquee::SpeedRange;
use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub marquee: MarqueeConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Used when nothing is persisted and there is no usable host origin.
    #[serde(default = "default_fallback_address")]
    pub fallback_address: String,
    /// Origin of the page hosting this controller, when it has one.  Empty
    /// means the controller runs standalone.
    #[serde(default)]
    pub host_origin: String,
    #[serde(default = "default_status_path")]
    pub status_path: String,
    #[serde(default = "default_events_path")]
    pub events_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Whether the push stream is available at all.  `false` goes straight
    /// to polling.
    #[serde(default = "default_push")]
    pub push: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_backoff_floor_ms")]
    pub backoff_floor_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarqueeConfig {
    #[serde(default = "default_speed_min")]
    pub speed_min: u32,
    #[serde(default = "default_speed_max")]
    pub speed_max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// How long a transient message occupies the status slot.
    #[serde(default = "default_transient_secs")]
    pub transient_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where the connection-target override is persisted.
    #[serde(default = "default_target_file")]
    pub target_file: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fallback_address: default_fallback_address(),
            host_origin: String::new(),
            status_path: default_status_path(),
            events_path: default_events_path(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            push: default_push(),
            poll_interval_secs: default_poll_interval_secs(),
            backoff_floor_ms: default_backoff_floor_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TransportConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn backoff_floor(&self) -> Duration {
        Duration::from_millis(self.backoff_floor_ms.max(1))
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms.max(self.backoff_floor_ms).max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for MarqueeConfig {
    fn default() -> Self {
        Self {
            speed_min: default_speed_min(),
            speed_max: default_speed_max(),
        }
    }
}

impl MarqueeConfig {
    pub fn speed_range(&self) -> SpeedRange {
        SpeedRange::new(self.speed_min, self.speed_max)
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            transient_secs: default_transient_secs(),
        }
    }
}

impl StatusConfig {
    pub fn transient_window(&self) -> Duration {
        Duration::from_secs(self.transient_secs)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            target_file: default_target_file(),
        }
    }
}

fn default_fallback_address() -> String {
    "http://192.168.4.1".to_string()
}

fn default_status_path() -> String {
    "/api/status".to_string()
}

fn default_events_path() -> String {
    "/api/events".to_string()
}

fn default_push() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_backoff_floor_ms() -> u64 {
    2000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_speed_min() -> u32 {
    10
}

fn default_speed_max() -> u32 {
    200
}

fn default_transient_secs() -> u64 {
    5
}

fn default_target_file() -> PathBuf {
    platform::data_dir().join("target.json")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
