//! UDS protocol constants and response helpers for the server side

/// UDS Service IDs
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const COMMUNICATION_CONTROL: u8 = 0x28;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    /// Every service the server knows how to handle
    pub const ALL: [u8; 10] = [
        DIAGNOSTIC_SESSION_CONTROL,
        ECU_RESET,
        READ_DATA_BY_ID,
        COMMUNICATION_CONTROL,
        WRITE_DATA_BY_ID,
        ROUTINE_CONTROL,
        REQUEST_DOWNLOAD,
        TRANSFER_DATA,
        REQUEST_TRANSFER_EXIT,
        TESTER_PRESENT,
    ];
}

/// DiagnosticSessionControl session types
pub mod session_type {
    pub const DEFAULT: u8 = 0x01;
    pub const PROGRAMMING: u8 = 0x02;
    pub const EXTENDED_DIAGNOSTIC: u8 = 0x03;
}

/// ECUReset reset types
pub mod reset_type {
    pub const HARD: u8 = 0x01;
    pub const KEY_OFF_ON: u8 = 0x02;
    pub const SOFT: u8 = 0x03;
}

/// RoutineControl sub-functions
pub mod routine_sub_function {
    pub const START_ROUTINE: u8 = 0x01;
    pub const STOP_ROUTINE: u8 = 0x02;
    pub const REQUEST_ROUTINE_RESULTS: u8 = 0x03;
}

/// Data identifiers the server answers itself
pub mod standard_did {
    pub const ACTIVE_DIAGNOSTIC_SESSION: u16 = 0xF186;
}

/// Suppress-positive-response bit of a sub-function byte
pub const SUPPRESS_POSITIVE_RESPONSE: u8 = 0x80;

/// UDS Negative Response Codes
pub mod nrc {
    pub const GENERAL_REJECT: u8 = 0x10;
    pub const SERVICE_NOT_SUPPORTED: u8 = 0x11;
    pub const SUB_FUNCTION_NOT_SUPPORTED: u8 = 0x12;
    pub const INCORRECT_MESSAGE_LENGTH: u8 = 0x13;
    pub const RESPONSE_TOO_LONG: u8 = 0x14;
    pub const CONDITIONS_NOT_CORRECT: u8 = 0x22;
    pub const REQUEST_SEQUENCE_ERROR: u8 = 0x24;
    pub const REQUEST_OUT_OF_RANGE: u8 = 0x31;
    pub const UPLOAD_DOWNLOAD_NOT_ACCEPTED: u8 = 0x70;
    pub const TRANSFER_DATA_SUSPENDED: u8 = 0x71;
    pub const GENERAL_PROGRAMMING_FAILURE: u8 = 0x72;
}

/// Create a positive response for a service
pub fn positive_response(service_id: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(service_id + 0x40); // Positive response = service + 0x40
    response.extend_from_slice(data);
    response
}

/// Create a negative response
pub fn negative_response(service_id: u8, nrc: u8) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, service_id, nrc]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_response_adds_offset() {
        assert_eq!(
            positive_response(service_id::READ_DATA_BY_ID, &[0x00, 0x03]),
            vec![0x62, 0x00, 0x03]
        );
    }

    #[test]
    fn test_negative_response_layout() {
        assert_eq!(
            negative_response(service_id::ECU_RESET, nrc::SUB_FUNCTION_NOT_SUPPORTED),
            vec![0x7F, 0x11, 0x12]
        );
    }
}
