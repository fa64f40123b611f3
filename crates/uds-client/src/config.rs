//! UDS client configuration
//!
//! Defaults reproduce the conformance harness setup: the tester sends on
//! 0x7A0 and listens on 0x7A8, frames are padded with 0xAA to 8 bytes and the
//! data identifiers 0x0000..=0x0008 carry one value of each integer width.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uds_isotp::LinkConfig;

use crate::codec::DidCodec;
use crate::transport::{ResponseTiming, TransportError};
use crate::uds::UdsError;

/// Configuration of a [`crate::UdsClient`] and its ISO-TP transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Transmit CAN ID (tester -> ECU)
    #[serde(default = "default_tx_id")]
    pub tx_id: String,
    /// Receive CAN ID (ECU -> tester)
    #[serde(default = "default_rx_id")]
    pub rx_id: String,
    #[serde(default)]
    pub isotp: IsoTpParams,
    /// Ignore trailing zero bytes after the last complete DID record
    #[serde(default = "default_true")]
    pub tolerate_zero_padding: bool,
    /// Skip DTC records that are entirely zero
    #[serde(default = "default_true")]
    pub ignore_all_zero_dtc: bool,
    #[serde(default = "default_true")]
    pub exception_on_negative_response: bool,
    #[serde(default = "default_true")]
    pub exception_on_invalid_response: bool,
    #[serde(default = "default_true")]
    pub exception_on_unexpected_response: bool,
    /// Overall bound on one request, including response-pending extensions
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_p2_timeout")]
    pub p2_timeout_ms: u64,
    #[serde(default = "default_p2_star_timeout")]
    pub p2_star_timeout_ms: u64,
    /// DID (hex string) -> codec format
    #[serde(default = "default_data_identifiers")]
    pub data_identifiers: BTreeMap<String, String>,
}

/// ISO-TP options of the tester side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoTpParams {
    /// TX padding byte value (`None` disables padding)
    #[serde(default = "default_padding")]
    pub tx_padding: Option<u8>,
    #[serde(default = "default_tx_data_min_length")]
    pub tx_data_min_length: usize,
    /// Block size for flow control (0 = no limit)
    #[serde(default)]
    pub block_size: u8,
    /// Separation time minimum (milliseconds)
    #[serde(default)]
    pub st_min_ms: u8,
    /// Send consecutive frames back to back regardless of the server's STmin
    #[serde(default = "default_true")]
    pub squash_stmin_requirement: bool,
    #[serde(default = "default_n_timeout")]
    pub n_bs_timeout_ms: u64,
    #[serde(default = "default_n_timeout")]
    pub n_cr_timeout_ms: u64,
}

fn default_tx_id() -> String {
    "0x7A0".to_string()
}

fn default_rx_id() -> String {
    "0x7A8".to_string()
}

fn default_true() -> bool {
    true
}

fn default_padding() -> Option<u8> {
    Some(0xAA)
}

fn default_tx_data_min_length() -> usize {
    8
}

fn default_n_timeout() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_p2_timeout() -> u64 {
    1500
}

fn default_p2_star_timeout() -> u64 {
    5000
}

/// Record layouts served by the reference ECU
pub fn default_data_identifiers() -> BTreeMap<String, String> {
    [
        ("0x0000", "B"),
        ("0x0001", "b"),
        ("0x0002", "H"),
        ("0x0003", "h"),
        ("0x0004", "I"),
        ("0x0005", "i"),
        ("0x0006", "Q"),
        ("0x0007", "q"),
        ("0x0008", "20B"),
    ]
    .into_iter()
    .map(|(did, format)| (did.to_string(), format.to_string()))
    .collect()
}

impl Default for IsoTpParams {
    fn default() -> Self {
        Self {
            tx_padding: default_padding(),
            tx_data_min_length: default_tx_data_min_length(),
            block_size: 0,
            st_min_ms: 0,
            squash_stmin_requirement: true,
            n_bs_timeout_ms: default_n_timeout(),
            n_cr_timeout_ms: default_n_timeout(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tx_id: default_tx_id(),
            rx_id: default_rx_id(),
            isotp: IsoTpParams::default(),
            tolerate_zero_padding: true,
            ignore_all_zero_dtc: true,
            exception_on_negative_response: true,
            exception_on_invalid_response: true,
            exception_on_unexpected_response: true,
            request_timeout_ms: default_request_timeout(),
            p2_timeout_ms: default_p2_timeout(),
            p2_star_timeout_ms: default_p2_star_timeout(),
            data_identifiers: default_data_identifiers(),
        }
    }
}

impl ClientConfig {
    /// Load from a file; `.yaml` / `.yml` are read as YAML, anything else as TOML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            _ => Ok(toml::from_str(&content)?),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Tester-side ISO-TP link settings
    pub fn link_config(&self) -> Result<LinkConfig, TransportError> {
        Ok(LinkConfig {
            tx_id: parse_can_id(&self.tx_id)?,
            rx_id: parse_can_id(&self.rx_id)?,
            padding: self.isotp.tx_padding,
            tx_data_min_length: self.isotp.tx_data_min_length,
            block_size: self.isotp.block_size,
            st_min_ms: self.isotp.st_min_ms,
            squash_st_min: self.isotp.squash_stmin_requirement,
            n_bs_timeout_ms: self.isotp.n_bs_timeout_ms,
            n_cr_timeout_ms: self.isotp.n_cr_timeout_ms,
            max_message_len: uds_isotp::MAX_MESSAGE_LEN,
        })
    }

    /// Parse every configured data identifier layout
    pub fn did_codecs(&self) -> Result<BTreeMap<u16, DidCodec>, UdsError> {
        self.data_identifiers
            .iter()
            .map(|(did, format)| {
                let id = parse_did(did)?;
                Ok((id, DidCodec::parse(format)?))
            })
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn response_timing(&self) -> ResponseTiming {
        ResponseTiming {
            p2: Duration::from_millis(self.p2_timeout_ms),
            p2_star: Duration::from_millis(self.p2_star_timeout_ms),
        }
    }
}

/// Mock transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
}

fn split_radix(s: &str) -> (&str, u32) {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    }
}

/// Parse a CAN ID from string (supports hex with 0x prefix)
pub fn parse_can_id(s: &str) -> Result<u32, TransportError> {
    let (digits, radix) = split_radix(s);
    u32::from_str_radix(digits, radix)
        .map_err(|e| TransportError::InvalidConfig(format!("Invalid CAN ID '{}': {}", s, e)))
}

/// Parse a data identifier (supports hex with 0x prefix)
pub fn parse_did(s: &str) -> Result<u16, UdsError> {
    let (digits, radix) = split_radix(s);
    u16::from_str_radix(digits, radix)
        .map_err(|e| UdsError::Config(format!("Invalid DID '{}': {}", s, e)))
}
