//! In-process simulated CAN bus
//!
//! Provides the classic [`CanFrame`] and a broadcast [`SimBus`] that test
//! participants attach to. Used by the UDS harness in place of a SocketCAN
//! interface so that client and DUT share a bus without any kernel setup.
//!
//! ```
//! use sim_can::SimBus;
//!
//! let bus = SimBus::new("vcan0");
//! let tester = bus.attach();
//! let mut ecu = bus.attach();
//!
//! tester.send_raw(0x7A0, &[0x02, 0x3E, 0x00]).unwrap();
//! assert_eq!(ecu.try_receive().unwrap().data(), &[0x02, 0x3E, 0x00]);
//! ```

pub mod bus;
pub mod frame;

pub use bus::{BusPort, BusSender, SimBus};
pub use frame::{CanFrame, FrameError, EXTENDED_ID_MAX, MAX_DATA_LEN, STANDARD_ID_MAX};
