//! Classic CAN frame as carried by the simulated bus

use std::fmt;
use std::time::Instant;

use thiserror::Error;

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Highest 11-bit (standard) identifier
pub const STANDARD_ID_MAX: u32 = 0x7FF;

/// Highest 29-bit (extended) identifier
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// Rejected frame construction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too long: {len} bytes (max 8)")]
    PayloadTooLong { len: usize },

    #[error("Identifier 0x{id:X} out of range for {} frame", id_format(.extended))]
    IdOutOfRange { id: u32, extended: bool },
}

fn id_format(extended: &bool) -> &'static str {
    if *extended {
        "extended"
    } else {
        "standard"
    }
}

/// A single CAN frame
///
/// Frames are immutable once built. The payload is stored in a fixed 8-byte
/// buffer; only the first `len` bytes are meaningful.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    data: [u8; MAX_DATA_LEN],
    len: u8,
    extended: bool,
    timestamp: Instant,
}

impl CanFrame {
    /// Build a frame with an 11-bit identifier
    pub fn new(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::build(id, data, false)
    }

    /// Build a frame with a 29-bit identifier
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::build(id, data, true)
    }

    /// Build a frame, choosing the identifier format from the value
    ///
    /// Identifiers above 0x7FF are sent as extended frames.
    pub fn with_auto_id(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::build(id, data, id > STANDARD_ID_MAX)
    }

    fn build(id: u32, data: &[u8], extended: bool) -> Result<Self, FrameError> {
        if data.len() > MAX_DATA_LEN {
            return Err(FrameError::PayloadTooLong { len: data.len() });
        }
        let max = if extended {
            EXTENDED_ID_MAX
        } else {
            STANDARD_ID_MAX
        };
        if id > max {
            return Err(FrameError::IdOutOfRange { id, extended });
        }

        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);

        Ok(Self {
            id,
            data: buf,
            len: data.len() as u8,
            extended,
            timestamp: Instant::now(),
        })
    }

    /// Arbitration identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Meaningful payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Payload length (DLC)
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the identifier is 29-bit
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Monotonic time at which the frame was built
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &format_args!("0x{:X}", self.id))
            .field("data", &hex::encode_upper(self.data()))
            .field("extended", &self.extended)
            .finish()
    }
}

/// Renders `ID#DATA` the way candump does
impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X}#{}", self.id, hex::encode_upper(self.data()))
        } else {
            write!(f, "{:03X}#{}", self.id, hex::encode_upper(self.data()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_keeps_payload_and_length() {
        let frame = CanFrame::new(0x7A0, &[0x02, 0x11, 0x01]).unwrap();
        assert_eq!(frame.id(), 0x7A0);
        assert_eq!(frame.data(), &[0x02, 0x11, 0x01]);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_extended());
    }

    #[test]
    fn test_payload_longer_than_eight_bytes_rejected() {
        let err = CanFrame::new(0x7A0, &[0u8; 9]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLong { len: 9 });
    }

    #[test]
    fn test_standard_id_range_enforced() {
        assert!(CanFrame::new(0x7FF, &[]).is_ok());
        assert_eq!(
            CanFrame::new(0x800, &[]).unwrap_err(),
            FrameError::IdOutOfRange {
                id: 0x800,
                extended: false
            }
        );
        assert!(CanFrame::new_extended(0x18DA00F1, &[]).is_ok());
        assert!(CanFrame::new_extended(0x2000_0000, &[]).is_err());
    }

    #[test]
    fn test_auto_id_selects_format() {
        assert!(!CanFrame::with_auto_id(0x7DF, &[1]).unwrap().is_extended());
        assert!(CanFrame::with_auto_id(0x18DB33F1, &[1])
            .unwrap()
            .is_extended());
    }

    #[test]
    fn test_display_matches_candump() {
        let frame = CanFrame::new(0x7A8, &[0x06, 0x62, 0x00, 0x03]).unwrap();
        assert_eq!(frame.to_string(), "7A8#06620003");
        let ext = CanFrame::new_extended(0x18DAF100, &[0xAB]).unwrap();
        assert_eq!(ext.to_string(), "18DAF100#AB");
    }
}
