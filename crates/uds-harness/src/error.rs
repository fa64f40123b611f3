//! Harness errors

use sim_can::FrameError;
use thiserror::Error;
use uds_client::{TransportError, UdsError};

use crate::harness::LifecycleState;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// DUT `init()` returned a non-zero status; no loop was started
    #[error("DUT initialization failed with status {status}")]
    SetupFailure { status: i32 },

    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("Timed out waiting for {what} after {waited_ms} ms")]
    Timeout { what: String, waited_ms: u64 },

    #[error("Protocol error: {0}")]
    Protocol(#[from] UdsError),

    #[error("Invalid state: expected {expected}, was {actual}")]
    InvalidState {
        expected: LifecycleState,
        actual: LifecycleState,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl From<TransportError> for HarnessError {
    fn from(err: TransportError) -> Self {
        HarnessError::Protocol(err.into())
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
