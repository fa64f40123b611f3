//! DTC (Diagnostic Trouble Code) handling for ReadDTCInformation (0x19)

/// Sub-function codes for ReadDTCInformation (0x19)
pub mod sub_function {
    /// Report number of DTCs matching a status mask
    pub const REPORT_NUMBER_OF_DTC_BY_STATUS_MASK: u8 = 0x01;
    /// Report DTCs matching a status mask
    pub const REPORT_DTC_BY_STATUS_MASK: u8 = 0x02;
}

/// DTC status byte bit definitions per ISO 14229-1
pub mod status_bit {
    pub const TEST_FAILED: u8 = 0x01;
    pub const TEST_FAILED_THIS_OPERATION_CYCLE: u8 = 0x02;
    pub const PENDING_DTC: u8 = 0x04;
    pub const CONFIRMED_DTC: u8 = 0x08;
    pub const TEST_NOT_COMPLETED_SINCE_LAST_CLEAR: u8 = 0x10;
    pub const TEST_FAILED_SINCE_LAST_CLEAR: u8 = 0x20;
    pub const TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE: u8 = 0x40;
    pub const WARNING_INDICATOR_REQUESTED: u8 = 0x80;
}

/// DTC status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtcStatus(pub u8);

impl DtcStatus {
    pub fn test_failed(self) -> bool {
        self.0 & status_bit::TEST_FAILED != 0
    }

    pub fn pending(self) -> bool {
        self.0 & status_bit::PENDING_DTC != 0
    }

    pub fn confirmed(self) -> bool {
        self.0 & status_bit::CONFIRMED_DTC != 0
    }

    /// Test failed and confirmed
    pub fn is_active(self) -> bool {
        self.test_failed() && self.confirmed()
    }

    pub fn matches_mask(self, mask: u8) -> bool {
        self.0 & mask != 0
    }
}

/// A DTC with its status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtc {
    /// 24-bit DTC number
    pub id: u32,
    pub status: DtcStatus,
}

impl Dtc {
    pub fn new(high: u8, mid: u8, low: u8, status: u8) -> Self {
        Self {
            id: u32::from_be_bytes([0, high, mid, low]),
            status: DtcStatus(status),
        }
    }

    /// SAE J2012 code, e.g. P0101 or U0100
    pub fn to_code_string(&self) -> String {
        let [_, high, mid, _] = self.id.to_be_bytes();
        let prefix = match high >> 6 {
            0 => 'P',
            1 => 'C',
            2 => 'B',
            _ => 'U',
        };
        format!("{}{:01X}{:01X}{:02X}", prefix, (high >> 4) & 0x03, high & 0x0F, mid)
    }
}

/// Parse a reportDTCByStatusMask (0x59 0x02) response
///
/// Returns the status availability mask and the DTC records. With
/// `ignore_all_zero` set, records that are entirely zero (DTC and status)
/// are skipped, as some servers pad the list with them.
pub fn parse_dtc_by_status_mask_response(
    response: &[u8],
    ignore_all_zero: bool,
) -> Result<(u8, Vec<Dtc>), String> {
    if response.len() < 3 {
        return Err(format!("Response too short: {} bytes", response.len()));
    }
    if response[0] != 0x59 {
        return Err(format!("Invalid response SID: 0x{:02X}", response[0]));
    }
    if response[1] != sub_function::REPORT_DTC_BY_STATUS_MASK {
        return Err(format!("Invalid sub-function: 0x{:02X}", response[1]));
    }

    let records = &response[3..];
    if records.len() % 4 != 0 && !(ignore_all_zero && records.iter().all(|b| *b == 0)) {
        return Err(format!(
            "DTC records not a multiple of 4 bytes: {}",
            records.len()
        ));
    }

    let dtcs = records
        .chunks_exact(4)
        .filter(|chunk| !(ignore_all_zero && chunk.iter().all(|b| *b == 0)))
        .map(|chunk| Dtc::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect();

    Ok((response[2], dtcs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtc_code_strings() {
        assert_eq!(Dtc::new(0x01, 0x01, 0x00, 0).to_code_string(), "P0101");
        assert_eq!(Dtc::new(0x44, 0x20, 0x00, 0).to_code_string(), "C0420");
        assert_eq!(Dtc::new(0x92, 0x34, 0x00, 0).to_code_string(), "B1234");
        assert_eq!(Dtc::new(0xC1, 0x00, 0x00, 0).to_code_string(), "U0100");
    }

    #[test]
    fn test_status_bits() {
        let active = DtcStatus(0x09);
        assert!(active.is_active());
        assert!(!active.pending());
        assert!(DtcStatus(0x04).pending());
        assert!(!DtcStatus(0x04).is_active());
    }

    #[test]
    fn test_parse_by_status_mask() {
        let response = [
            0x59, 0x02, 0xFF, //
            0x01, 0x01, 0x00, 0x09, //
            0x44, 0x20, 0x00, 0x04,
        ];
        let (mask, dtcs) = parse_dtc_by_status_mask_response(&response, false).unwrap();
        assert_eq!(mask, 0xFF);
        assert_eq!(dtcs.len(), 2);
        assert_eq!(dtcs[0].id, 0x010100);
        assert!(dtcs[1].status.pending());
    }

    #[test]
    fn test_all_zero_records_ignored_when_requested() {
        let response = [0x59, 0x02, 0xFF, 0x01, 0x01, 0x00, 0x09, 0, 0, 0, 0];
        let (_, kept) = parse_dtc_by_status_mask_response(&response, true).unwrap();
        assert_eq!(kept.len(), 1);
        let (_, all) = parse_dtc_by_status_mask_response(&response, false).unwrap();
        assert_eq!(all.len(), 2);
    }
}
