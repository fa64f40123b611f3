//! ISO-TP link errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IsoTpError {
    #[error("Cannot send an empty message")]
    EmptyPayload,

    #[error("Message too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Transmission already in progress")]
    Busy,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Wrong sequence number: expected {expected}, got {actual}")]
    UnexpectedSequence { expected: u8, actual: u8 },

    #[error("Receiver reported buffer overflow")]
    PeerOverflow,

    #[error("Timed out waiting for flow control (N_Bs)")]
    FlowControlTimeout,

    #[error("Timed out waiting for consecutive frame (N_Cr)")]
    ConsecutiveFrameTimeout,
}
