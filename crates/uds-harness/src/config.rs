//! Harness configuration
//!
//! Every section has defaults matching the reference harness setup, so an
//! empty file (or `HarnessConfig::default()`) is a working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uds_client::ClientConfig;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Name of the simulated CAN channel
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub observer: ObserverConfig,
    #[serde(default)]
    pub client: ClientConfig,
    /// Record every bus frame and dump it at debug level on shutdown
    #[serde(default)]
    pub capture_traffic: bool,
    /// Upper bound on joining one background task during shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

/// DUT driver loop timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Receive loop wait per iteration; bounds teardown latency
    #[serde(default = "default_interval")]
    pub receive_timeout_ms: u64,
    /// Sleep between two `poll` calls
    #[serde(default = "default_interval")]
    pub poll_interval_ms: u64,
}

/// Event observer timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default = "default_interval")]
    pub poll_interval_ms: u64,
}

fn default_channel() -> String {
    "vcan1".to_string()
}

fn default_interval() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    1000
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            driver: DriverConfig::default(),
            observer: ObserverConfig::default(),
            client: ClientConfig::default(),
            capture_traffic: false,
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: default_interval(),
            poll_interval_ms: default_interval(),
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_interval(),
        }
    }
}

impl HarnessConfig {
    /// Load from a file; `.yaml` / `.yml` are read as YAML, anything else as TOML
    pub fn load(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("{}: {}", path.display(), e)))?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            _ => Self::from_toml_str(&content)?,
        };
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> HarnessResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> HarnessResult<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a loop spin or never wake up
    pub fn validate(&self) -> HarnessResult<()> {
        if self.channel.is_empty() {
            return Err(HarnessError::Config("channel must not be empty".into()));
        }
        for (name, value) in [
            ("driver.receive_timeout_ms", self.driver.receive_timeout_ms),
            ("driver.poll_interval_ms", self.driver.poll_interval_ms),
            ("observer.poll_interval_ms", self.observer.poll_interval_ms),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
        ] {
            if value == 0 {
                return Err(HarnessError::Config(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl DriverConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ObserverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
