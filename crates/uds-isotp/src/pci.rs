//! Protocol control information (first byte(s) of every ISO-TP frame)

use crate::error::IsoTpError;

// Frame type nibble
const SINGLE_FRAME: u8 = 0x0;
const FIRST_FRAME: u8 = 0x1;
const CONSECUTIVE_FRAME: u8 = 0x2;
const FLOW_CONTROL: u8 = 0x3;

/// Payload bytes carried by a single frame
pub const SF_MAX_DATA: usize = 7;
/// Payload bytes carried by a first frame
pub const FF_DATA: usize = 6;
/// Payload bytes carried by a consecutive frame
pub const CF_MAX_DATA: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    ContinueToSend,
    Wait,
    Overflow,
}

impl FlowStatus {
    fn nibble(self) -> u8 {
        match self {
            FlowStatus::ContinueToSend => 0,
            FlowStatus::Wait => 1,
            FlowStatus::Overflow => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pci {
    Single { len: usize },
    First { len: usize },
    Consecutive { seq: u8 },
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        st_min: u8,
    },
}

/// Split a CAN payload into its PCI and the data bytes it carries
///
/// For single frames the returned slice is already cut to the announced
/// length, so trailing padding is dropped.
pub fn decode(frame: &[u8]) -> Result<(Pci, &[u8]), IsoTpError> {
    let first = *frame
        .first()
        .ok_or_else(|| IsoTpError::InvalidFrame("empty CAN payload".into()))?;

    match first >> 4 {
        SINGLE_FRAME => {
            let len = (first & 0x0F) as usize;
            if len == 0 || len > SF_MAX_DATA || frame.len() < 1 + len {
                return Err(IsoTpError::InvalidFrame(format!(
                    "single frame length {} in {} byte frame",
                    len,
                    frame.len()
                )));
            }
            Ok((Pci::Single { len }, &frame[1..1 + len]))
        }
        FIRST_FRAME => {
            if frame.len() < 8 {
                return Err(IsoTpError::InvalidFrame(format!(
                    "first frame needs 8 bytes, got {}",
                    frame.len()
                )));
            }
            let len = (((first & 0x0F) as usize) << 8) | frame[1] as usize;
            if len <= SF_MAX_DATA {
                return Err(IsoTpError::InvalidFrame(format!(
                    "first frame announces only {} bytes",
                    len
                )));
            }
            Ok((Pci::First { len }, &frame[2..]))
        }
        CONSECUTIVE_FRAME => Ok((
            Pci::Consecutive {
                seq: first & 0x0F,
            },
            &frame[1..],
        )),
        FLOW_CONTROL => {
            if frame.len() < 3 {
                return Err(IsoTpError::InvalidFrame(
                    "flow control frame shorter than 3 bytes".into(),
                ));
            }
            let status = match first & 0x0F {
                0 => FlowStatus::ContinueToSend,
                1 => FlowStatus::Wait,
                2 => FlowStatus::Overflow,
                other => {
                    return Err(IsoTpError::InvalidFrame(format!(
                        "unknown flow status {}",
                        other
                    )))
                }
            };
            Ok((
                Pci::FlowControl {
                    status,
                    block_size: frame[1],
                    st_min: frame[2],
                },
                &[],
            ))
        }
        other => Err(IsoTpError::InvalidFrame(format!(
            "unknown frame type 0x{:X}",
            other
        ))),
    }
}

pub fn single_frame(data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push((SINGLE_FRAME << 4) | data.len() as u8);
    frame.extend_from_slice(data);
    frame
}

pub fn first_frame(total_len: usize, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push((FIRST_FRAME << 4) | ((total_len >> 8) as u8 & 0x0F));
    frame.push(total_len as u8);
    frame.extend_from_slice(data);
    frame
}

pub fn consecutive_frame(seq: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push((CONSECUTIVE_FRAME << 4) | (seq & 0x0F));
    frame.extend_from_slice(data);
    frame
}

pub fn flow_control(status: FlowStatus, block_size: u8, st_min: u8) -> Vec<u8> {
    vec![(FLOW_CONTROL << 4) | status.nibble(), block_size, st_min]
}

/// Translate an STmin byte into whole milliseconds
///
/// Sub-millisecond values (0xF1..=0xF9) round up to 1 ms; reserved values
/// are treated as the maximum of 127 ms.
pub fn st_min_to_ms(st_min: u8) -> u64 {
    match st_min {
        0x00..=0x7F => st_min as u64,
        0xF1..=0xF9 => 1,
        _ => 0x7F,
    }
}
