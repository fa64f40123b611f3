//! Example ECU configuration
//!
//! Defaults reproduce the conformance harness server: physical requests on
//! 0x7A0, functional requests on 0x7DF, responses on 0x7A8, P2 50 ms,
//! P2* 2000 ms, S3 5000 ms, and only ECUReset and ReadDataByIdentifier
//! enabled.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uds_isotp::LinkConfig;

use crate::uds::service_id;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete example ECU configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcuConfig {
    /// ECU identifier, used in log output
    #[serde(default = "default_id")]
    pub id: String,

    #[serde(default)]
    pub addressing: AddressingConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub isotp: IsoTpConfig,

    /// Services answered by the server; anything else gets NRC 0x11
    #[serde(
        default = "default_enabled_services",
        deserialize_with = "deserialize_hex_u8_vec"
    )]
    pub enabled_services: Vec<u8>,

    #[serde(default)]
    pub transfer: TransferConfig,
}

fn default_id() -> String {
    "example_ecu".to_string()
}

fn default_enabled_services() -> Vec<u8> {
    vec![service_id::ECU_RESET, service_id::READ_DATA_BY_ID]
}

impl Default for EcuConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            addressing: AddressingConfig::default(),
            timing: TimingConfig::default(),
            isotp: IsoTpConfig::default(),
            enabled_services: default_enabled_services(),
            transfer: TransferConfig::default(),
        }
    }
}

impl EcuConfig {
    /// Default configuration with every implemented service enabled
    pub fn with_all_services() -> Self {
        Self {
            enabled_services: service_id::ALL.to_vec(),
            ..Self::default()
        }
    }

    /// Load from a file; `.yaml` / `.yml` are read as YAML, anything else as TOML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            _ => toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?,
        };
        Ok(config)
    }

    pub fn is_enabled(&self, service: u8) -> bool {
        self.enabled_services.contains(&service)
    }

    /// ISO-TP settings of the physical request link
    pub fn physical_link(&self) -> Result<LinkConfig, ConfigError> {
        self.link(&self.addressing.phys_rx_id)
    }

    /// ISO-TP settings of the functional request link
    pub fn functional_link(&self) -> Result<LinkConfig, ConfigError> {
        self.link(&self.addressing.func_rx_id)
    }

    fn link(&self, rx_id: &str) -> Result<LinkConfig, ConfigError> {
        let mut link = LinkConfig::new(parse_can_id(&self.addressing.tx_id)?, parse_can_id(rx_id)?)
            .with_block_size(self.isotp.block_size)
            .with_st_min(self.isotp.st_min_ms);
        if let Some(byte) = self.isotp.padding {
            link = link.with_padding(byte);
        }
        Ok(link)
    }

    /// Check the addressing for collisions
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tx = parse_can_id(&self.addressing.tx_id)?;
        let phys = parse_can_id(&self.addressing.phys_rx_id)?;
        let func = parse_can_id(&self.addressing.func_rx_id)?;
        if tx == phys || tx == func || phys == func {
            return Err(ConfigError::Invalid(format!(
                "CAN ids must be distinct: tx 0x{:03X}, phys 0x{:03X}, func 0x{:03X}",
                tx, phys, func
            )));
        }
        if self.timing.p2_ms == 0 {
            return Err(ConfigError::Invalid("timing.p2_ms must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Addressing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressingConfig {
    /// Physical request CAN ID (tester -> this ECU)
    #[serde(default = "default_phys_rx_id")]
    pub phys_rx_id: String,

    /// Functional (broadcast) request CAN ID
    #[serde(default = "default_func_rx_id")]
    pub func_rx_id: String,

    /// Response CAN ID (this ECU -> tester)
    #[serde(default = "default_tx_id")]
    pub tx_id: String,
}

fn default_phys_rx_id() -> String {
    "0x7A0".to_string()
}

fn default_func_rx_id() -> String {
    "0x7DF".to_string()
}

fn default_tx_id() -> String {
    "0x7A8".to_string()
}

impl Default for AddressingConfig {
    fn default() -> Self {
        Self {
            phys_rx_id: default_phys_rx_id(),
            func_rx_id: default_func_rx_id(),
            tx_id: default_tx_id(),
        }
    }
}

// =============================================================================
// Timing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minimum gap before a response is released
    #[serde(default = "default_p2_ms")]
    pub p2_ms: u16,

    /// Extended response time announced in the session response
    #[serde(default = "default_p2_star_ms")]
    pub p2_star_ms: u32,

    /// Non-default session timeout without requests
    #[serde(default = "default_s3_ms")]
    pub s3_ms: u32,

    /// Delay between a hard reset response and the reset itself
    #[serde(default = "default_hard_reset_delay_ms")]
    pub hard_reset_delay_ms: u32,
}

fn default_p2_ms() -> u16 {
    50
}

fn default_p2_star_ms() -> u32 {
    2000
}

fn default_s3_ms() -> u32 {
    5000
}

fn default_hard_reset_delay_ms() -> u32 {
    100
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            p2_ms: default_p2_ms(),
            p2_star_ms: default_p2_star_ms(),
            s3_ms: default_s3_ms(),
            hard_reset_delay_ms: default_hard_reset_delay_ms(),
        }
    }
}

// =============================================================================
// ISO-TP
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoTpConfig {
    /// Pad transmitted frames to 8 bytes with this value
    #[serde(default)]
    pub padding: Option<u8>,

    /// Block size announced in flow control frames
    #[serde(default = "default_block_size")]
    pub block_size: u8,

    /// STmin announced in flow control frames
    #[serde(default)]
    pub st_min_ms: u8,
}

fn default_block_size() -> u8 {
    8
}

impl Default for IsoTpConfig {
    fn default() -> Self {
        Self {
            padding: None,
            block_size: default_block_size(),
            st_min_ms: 0,
        }
    }
}

// =============================================================================
// Transfer (download into mock flash)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// First address of the mock flash
    #[serde(default = "default_flash_base", deserialize_with = "deserialize_hex_u32")]
    pub flash_base: u32,

    /// Size of the mock flash in bytes
    #[serde(default = "default_flash_size")]
    pub flash_size: u32,

    /// maxNumberOfBlockLength announced by RequestDownload (SID and counter included)
    #[serde(default = "default_max_block_length")]
    pub max_block_length: u16,
}

fn default_flash_base() -> u32 {
    0xF000
}

fn default_flash_size() -> u32 {
    0x10000
}

fn default_max_block_length() -> u16 {
    0x0402
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            flash_base: default_flash_base(),
            flash_size: default_flash_size(),
            max_block_length: default_max_block_length(),
        }
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

/// Parse a CAN ID from string (supports hex with 0x prefix)
pub fn parse_can_id(s: &str) -> Result<u32, ConfigError> {
    let trimmed = s.trim();
    let result = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    result.map_err(|e| ConfigError::Invalid(format!("Invalid CAN ID '{}': {}", s, e)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Hex(String),
    Int(u32),
}

impl HexOrInt {
    fn value(self) -> Result<u32, String> {
        match self {
            HexOrInt::Int(n) => Ok(n),
            HexOrInt::Hex(s) => {
                let s = s.trim();
                let digits = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                u32::from_str_radix(digits, 16).map_err(|e| e.to_string())
            }
        }
    }
}

/// Deserialize a hex u32 (supports "0xF000" or 61440)
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    HexOrInt::deserialize(deserializer)?
        .value()
        .map_err(D::Error::custom)
}

/// Deserialize a list of service ids (supports ["0x22", 17])
fn deserialize_hex_u8_vec<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    Vec::<HexOrInt>::deserialize(deserializer)?
        .into_iter()
        .map(|v| {
            let n = v.value().map_err(D::Error::custom)?;
            u8::try_from(n).map_err(|_| D::Error::custom(format!("service id {} out of range", n)))
        })
        .collect()
}
