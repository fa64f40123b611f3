//! Mock program flash and the download handler writing into it

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::server::{DownloadHandler, Nrc};
use crate::uds::nrc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("Range 0x{address:08X}+{len} outside flash 0x{base:08X}+{size}")]
    OutOfRange {
        address: u32,
        len: usize,
        base: u32,
        size: u32,
    },
}

/// Byte-addressable flash shared between the ECU and the test body
#[derive(Debug, Clone)]
pub struct MockFlash {
    base: u32,
    cells: Arc<Mutex<Vec<u8>>>,
}

impl MockFlash {
    /// Value of an erased cell
    pub const ERASED: u8 = 0xFF;

    pub fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            cells: Arc::new(Mutex::new(vec![Self::ERASED; size as usize])),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.cells.lock().len() as u32
    }

    /// `address..address + len` lies inside the flash
    pub fn contains(&self, address: u32, len: usize) -> bool {
        self.offset(address, len).is_ok()
    }

    fn offset(&self, address: u32, len: usize) -> Result<usize, FlashError> {
        let size = self.cells.lock().len();
        let start = address.checked_sub(self.base).map(|o| o as usize);
        match start {
            Some(start) if start.checked_add(len).is_some_and(|end| end <= size) => Ok(start),
            _ => Err(FlashError::OutOfRange {
                address,
                len,
                base: self.base,
                size: size as u32,
            }),
        }
    }

    pub fn read(&self, address: u32, len: usize) -> Result<Vec<u8>, FlashError> {
        let start = self.offset(address, len)?;
        Ok(self.cells.lock()[start..start + len].to_vec())
    }

    pub fn write(&self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        let start = self.offset(address, data.len())?;
        self.cells.lock()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn erase(&self) {
        self.cells.lock().fill(Self::ERASED);
    }

    /// Nothing has been programmed since the last erase
    pub fn is_erased(&self) -> bool {
        self.cells.lock().iter().all(|b| *b == Self::ERASED)
    }
}

/// Writes a RequestDownload / TransferData sequence into a [`MockFlash`]
#[derive(Debug)]
pub struct FlashDownload {
    flash: MockFlash,
    max_block_length: u16,
    cursor: u32,
    end: u32,
}

impl FlashDownload {
    pub fn new(flash: MockFlash, max_block_length: u16) -> Self {
        Self {
            flash,
            max_block_length,
            cursor: 0,
            end: 0,
        }
    }
}

impl DownloadHandler for FlashDownload {
    fn request(&mut self, data_format: u8, address: u32, size: u32) -> Result<u16, Nrc> {
        if data_format != 0x00 {
            debug!(data_format, "Compressed or encrypted download not supported");
            return Err(nrc::REQUEST_OUT_OF_RANGE);
        }
        if size == 0 || !self.flash.contains(address, size as usize) {
            warn!(
                address = format!("0x{:08X}", address),
                size,
                "Download outside mock flash"
            );
            return Err(nrc::REQUEST_OUT_OF_RANGE);
        }
        self.cursor = address;
        self.end = address + size;
        Ok(self.max_block_length)
    }

    fn transfer(&mut self, data: &[u8]) -> Result<(), Nrc> {
        if self.cursor as u64 + data.len() as u64 > self.end as u64 {
            warn!(
                cursor = format!("0x{:08X}", self.cursor),
                bytes = data.len(),
                "TransferData beyond announced size"
            );
            return Err(nrc::TRANSFER_DATA_SUSPENDED);
        }
        self.flash
            .write(self.cursor, data)
            .map_err(|_| nrc::GENERAL_PROGRAMMING_FAILURE)?;
        self.cursor += data.len() as u32;
        Ok(())
    }

    fn exit(&mut self) -> Result<(), Nrc> {
        if self.cursor != self.end {
            warn!(
                missing = self.end - self.cursor,
                "Transfer exit before all data was received"
            );
            return Err(nrc::REQUEST_SEQUENCE_ERROR);
        }
        info!(end = format!("0x{:08X}", self.end), "Flash download complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_flash_is_erased() {
        let flash = MockFlash::new(0xF000, 16);
        assert!(flash.is_erased());
        assert_eq!(flash.read(0xF000, 2).unwrap(), vec![0xFF, 0xFF]);
    }

    #[test]
    fn test_clones_share_cells() {
        let flash = MockFlash::new(0x100, 8);
        flash.clone().write(0x104, &[1, 2]).unwrap();
        assert_eq!(flash.read(0x103, 4).unwrap(), vec![0xFF, 1, 2, 0xFF]);
        flash.erase();
        assert!(flash.is_erased());
    }

    #[test]
    fn test_out_of_range_access_rejected() {
        let flash = MockFlash::new(0x100, 8);
        assert!(flash.read(0xFF, 1).is_err());
        assert!(flash.write(0x107, &[1, 2]).is_err());
        assert!(flash.contains(0x100, 8));
        assert!(!flash.contains(0x100, 9));
    }

    #[test]
    fn test_download_writes_sequentially() {
        let flash = MockFlash::new(0x100, 8);
        let mut download = FlashDownload::new(flash.clone(), 0x0102);
        assert_eq!(download.request(0x00, 0x102, 4), Ok(0x0102));
        download.transfer(&[1, 2]).unwrap();
        download.transfer(&[3, 4]).unwrap();
        assert_eq!(download.transfer(&[5]), Err(nrc::TRANSFER_DATA_SUSPENDED));
        assert_eq!(download.exit(), Ok(()));
        assert_eq!(flash.read(0x102, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_download_request_validation() {
        let mut download = FlashDownload::new(MockFlash::new(0x100, 8), 0x0102);
        assert_eq!(download.request(0x11, 0x100, 4), Err(nrc::REQUEST_OUT_OF_RANGE));
        assert_eq!(download.request(0x00, 0x100, 0), Err(nrc::REQUEST_OUT_OF_RANGE));
        assert_eq!(download.request(0x00, 0x106, 4), Err(nrc::REQUEST_OUT_OF_RANGE));
    }

    #[test]
    fn test_incomplete_download_fails_exit() {
        let mut download = FlashDownload::new(MockFlash::new(0x100, 8), 0x0102);
        download.request(0x00, 0x100, 4).unwrap();
        download.transfer(&[1]).unwrap();
        assert_eq!(download.exit(), Err(nrc::REQUEST_SEQUENCE_ERROR));
    }
}
