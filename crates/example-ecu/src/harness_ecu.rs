//! The reference ECU as a harness device under test
//!
//! [`HarnessEcu`] wires a [`UdsServer`] to fixed test data, a mock flash and
//! the event counters the conformance tests observe:
//!
//! | Counter                      | Incremented when                         |
//! |------------------------------|------------------------------------------|
//! | `mockSystemReset`            | a hard reset fires                       |
//! | `mockEraseProgramFlash`      | routine 0xFF00 is started                |
//! | `mockUserApplicationIsValid` | routine 0xFF01 checks the application    |

use std::collections::BTreeMap;

use tracing::{error, info};
use uds_harness::{Dut, EventCounter, EventCounters, SendCallback};

use crate::config::{ConfigError, EcuConfig};
use crate::flash::{FlashDownload, MockFlash};
use crate::server::{Nrc, Routine, ServerApp, UdsServer};
use crate::uds::nrc;

/// Event counter names
pub mod event {
    pub const SYSTEM_RESET: &str = "mockSystemReset";
    pub const ERASE_PROGRAM_FLASH: &str = "mockEraseProgramFlash";
    pub const USER_APPLICATION_IS_VALID: &str = "mockUserApplicationIsValid";
}

/// Routine identifiers
pub mod routine_id {
    pub const ERASE_PROGRAM_FLASH: u16 = 0xFF00;
    pub const CHECK_APPLICATION: u16 = 0xFF01;
}

/// Records of DIDs 0x0000..=0x0008
///
/// 0x0000-0x0007 hold their own index as u8, i8, u16, i16, u32, i32, u64 and
/// i64 (little endian); 0x0008 holds the bytes 1 to 20.
pub fn default_records() -> BTreeMap<u16, Vec<u8>> {
    BTreeMap::from([
        (0x0000, 0u8.to_le_bytes().to_vec()),
        (0x0001, 1i8.to_le_bytes().to_vec()),
        (0x0002, 2u16.to_le_bytes().to_vec()),
        (0x0003, 3i16.to_le_bytes().to_vec()),
        (0x0004, 4u32.to_le_bytes().to_vec()),
        (0x0005, 5i32.to_le_bytes().to_vec()),
        (0x0006, 6u64.to_le_bytes().to_vec()),
        (0x0007, 7i64.to_le_bytes().to_vec()),
        (0x0008, (1..=20).collect()),
    ])
}

struct HarnessData {
    records: BTreeMap<u16, Vec<u8>>,
    resets: EventCounter,
}

impl ServerApp for HarnessData {
    fn read_data(&mut self, did: u16) -> Result<Vec<u8>, Nrc> {
        self.records
            .get(&did)
            .cloned()
            .ok_or(nrc::REQUEST_OUT_OF_RANGE)
    }

    fn write_data(&mut self, did: u16, record: &[u8]) -> Result<(), Nrc> {
        let stored = self
            .records
            .get_mut(&did)
            .ok_or(nrc::REQUEST_OUT_OF_RANGE)?;
        if stored.len() != record.len() {
            return Err(nrc::INCORRECT_MESSAGE_LENGTH);
        }
        stored.copy_from_slice(record);
        Ok(())
    }

    fn hard_reset(&mut self) {
        self.resets.increment();
    }
}

struct EraseProgramFlash {
    flash: MockFlash,
    calls: EventCounter,
}

impl Routine for EraseProgramFlash {
    fn start(&mut self, _option_record: &[u8]) -> Result<Vec<u8>, Nrc> {
        self.calls.increment();
        self.flash.erase();
        info!(base = format!("0x{:08X}", self.flash.base()), "Program flash erased");
        Ok(vec![0x00])
    }
}

/// Reports 0x00 when the flash holds an application, 0x01 otherwise
struct CheckApplication {
    flash: MockFlash,
    calls: EventCounter,
}

impl Routine for CheckApplication {
    fn start(&mut self, _option_record: &[u8]) -> Result<Vec<u8>, Nrc> {
        self.calls.increment();
        let valid = !self.flash.is_erased();
        Ok(vec![0x00, if valid { 0x00 } else { 0x01 }])
    }
}

pub struct HarnessEcu {
    server: UdsServer,
    counters: EventCounters,
    flash: MockFlash,
}

impl HarnessEcu {
    pub fn new(config: EcuConfig) -> Result<Self, ConfigError> {
        let counters = EventCounters::new();
        let flash = MockFlash::new(config.transfer.flash_base, config.transfer.flash_size);
        let max_block_length = config.transfer.max_block_length;

        let data = HarnessData {
            records: default_records(),
            resets: counters.register(event::SYSTEM_RESET),
        };
        let mut server = UdsServer::new(config, Box::new(data))?;
        server.register_routine(
            routine_id::ERASE_PROGRAM_FLASH,
            Box::new(EraseProgramFlash {
                flash: flash.clone(),
                calls: counters.register(event::ERASE_PROGRAM_FLASH),
            }),
        );
        server.register_routine(
            routine_id::CHECK_APPLICATION,
            Box::new(CheckApplication {
                flash: flash.clone(),
                calls: counters.register(event::USER_APPLICATION_IS_VALID),
            }),
        );
        server.set_download_handler(Box::new(FlashDownload::new(
            flash.clone(),
            max_block_length,
        )));

        Ok(Self {
            server,
            counters,
            flash,
        })
    }

    /// Handle on the mock flash; stays valid after the ECU moves into a harness
    pub fn flash(&self) -> MockFlash {
        self.flash.clone()
    }

    pub fn server(&self) -> &UdsServer {
        &self.server
    }
}

impl Dut for HarnessEcu {
    fn register_send_callback(&mut self, callback: SendCallback) {
        self.server.set_send_callback(callback);
    }

    fn init(&mut self) -> i32 {
        match self.server.init() {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "ECU initialization failed");
                -1
            }
        }
    }

    fn ingest_frame(&mut self, id: u32, data: &[u8]) {
        self.server.receive_frame(id, data);
    }

    fn poll(&mut self, now_ms: u32) {
        self.server.poll(now_ms);
    }

    fn counters(&self) -> EventCounters {
        self.counters.clone()
    }
}
