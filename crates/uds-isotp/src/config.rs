//! ISO-TP link configuration

use serde::{Deserialize, Serialize};

/// Largest message a 12-bit first-frame length can describe
pub const MAX_MESSAGE_LEN: usize = 4095;

/// Addressing and flow-control parameters of one link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// CAN ID used for every frame this link sends
    pub tx_id: u32,
    /// CAN ID this link listens on
    pub rx_id: u32,
    /// Byte used to pad outgoing frames (`None` sends minimal frames)
    #[serde(default)]
    pub padding: Option<u8>,
    /// Outgoing frames shorter than this are padded up to it
    #[serde(default)]
    pub tx_data_min_length: usize,
    /// Block size advertised in our flow control frames (0 = no limit)
    #[serde(default)]
    pub block_size: u8,
    /// STmin advertised in our flow control frames
    #[serde(default)]
    pub st_min_ms: u8,
    /// Ignore the peer's STmin and send consecutive frames back to back
    #[serde(default)]
    pub squash_st_min: bool,
    #[serde(default = "default_n_bs_timeout")]
    pub n_bs_timeout_ms: u64,
    #[serde(default = "default_n_cr_timeout")]
    pub n_cr_timeout_ms: u64,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

fn default_n_bs_timeout() -> u64 {
    1000
}

fn default_n_cr_timeout() -> u64 {
    1000
}

fn default_max_message_len() -> usize {
    MAX_MESSAGE_LEN
}

impl LinkConfig {
    pub fn new(tx_id: u32, rx_id: u32) -> Self {
        Self {
            tx_id,
            rx_id,
            padding: None,
            tx_data_min_length: 0,
            block_size: 0,
            st_min_ms: 0,
            squash_st_min: false,
            n_bs_timeout_ms: default_n_bs_timeout(),
            n_cr_timeout_ms: default_n_cr_timeout(),
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    pub fn with_padding(mut self, byte: u8) -> Self {
        self.padding = Some(byte);
        self
    }

    pub fn with_block_size(mut self, block_size: u8) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_st_min(mut self, st_min_ms: u8) -> Self {
        self.st_min_ms = st_min_ms;
        self
    }

    /// Length outgoing frames are padded to, capped at the CAN payload size
    pub(crate) fn padded_len(&self) -> usize {
        let from_padding = if self.padding.is_some() { 8 } else { 0 };
        self.tx_data_min_length.max(from_padding).min(8)
    }

    pub(crate) fn fill_byte(&self) -> u8 {
        self.padding.unwrap_or(0xCC)
    }
}
