//! UDS (Unified Diagnostic Services) protocol implementation
//!
//! Request encoding, response matching and the typed service calls used by
//! conformance tests.

mod client;
pub mod dtc;
mod error;
mod nrc;

pub use client::{
    DownloadResponse, MemoryLocation, ResponseStatus, RoutineResult, SessionTiming, UdsClient,
    UdsResponse,
};
pub use dtc::{Dtc, DtcStatus};
pub use error::UdsError;
pub use nrc::NegativeResponseCode;

/// Standard UDS service ID constants
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_INFO: u8 = 0x19;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const COMMUNICATION_CONTROL: u8 = 0x28;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    /// Positive responses echo the request SID with bit 6 set
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
}

/// DiagnosticSessionControl (0x10) session types
pub mod session_type {
    pub const DEFAULT: u8 = 0x01;
    pub const PROGRAMMING: u8 = 0x02;
    pub const EXTENDED_DIAGNOSTIC: u8 = 0x03;
}

/// ECUReset (0x11) sub-functions
pub mod reset_type {
    /// Hard reset - complete shutdown and restart of ECU
    pub const HARD_RESET: u8 = 0x01;
    /// Key off/on reset - simulate ignition cycle
    pub const KEY_OFF_ON_RESET: u8 = 0x02;
    /// Soft reset - application-level restart
    pub const SOFT_RESET: u8 = 0x03;
}

/// RoutineControl (0x31) sub-functions
pub mod routine_sub_function {
    pub const START_ROUTINE: u8 = 0x01;
    pub const STOP_ROUTINE: u8 = 0x02;
    pub const REQUEST_ROUTINE_RESULTS: u8 = 0x03;
}

/// CommunicationControl (0x28) control and communication types
pub mod communication_control {
    pub const ENABLE_RX_AND_TX: u8 = 0x00;
    pub const ENABLE_RX_AND_DISABLE_TX: u8 = 0x01;
    pub const DISABLE_RX_AND_ENABLE_TX: u8 = 0x02;
    pub const DISABLE_RX_AND_TX: u8 = 0x03;

    pub const NORMAL_COMMUNICATION_MESSAGES: u8 = 0x01;
    pub const NETWORK_MANAGEMENT_MESSAGES: u8 = 0x02;
}

/// Suppress-positive-response bit of a sub-function byte
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;
