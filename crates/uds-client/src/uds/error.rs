//! UDS protocol errors

use thiserror::Error;

use super::NegativeResponseCode;
use crate::codec::CodecError;
use crate::transport::TransportError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UdsError {
    #[error("Negative response: {nrc} (0x{nrc:02X}) for service 0x{service_id:02X}")]
    NegativeResponse {
        service_id: u8,
        nrc: NegativeResponseCode,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Response timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<TransportError> for UdsError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => UdsError::Timeout,
            other => UdsError::Transport(other.to_string()),
        }
    }
}
