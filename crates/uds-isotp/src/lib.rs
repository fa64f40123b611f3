//! uds-isotp - ISO 15765-2 transport for classic CAN
//!
//! A small, I/O-free implementation of ISO-TP segmentation and reassembly.
//! Both the tester side and the simulated ECU drive an [`IsoTpLink`] from
//! their own loops and move frames on and off the bus themselves.
//!
//! ```
//! use uds_isotp::{IsoTpLink, LinkConfig};
//!
//! let mut tester = IsoTpLink::new(LinkConfig::new(0x7A0, 0x7A8));
//! let mut ecu = IsoTpLink::new(LinkConfig::new(0x7A8, 0x7A0));
//!
//! tester.send(&[0x22, 0xF1, 0x90], 0).unwrap();
//! for frame in tester.drain_outbound() {
//!     ecu.on_frame(&frame, 0).unwrap();
//! }
//! assert_eq!(ecu.take_received(), Some(vec![0x22, 0xF1, 0x90]));
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod pci;

pub use config::{LinkConfig, MAX_MESSAGE_LEN};
pub use error::IsoTpError;
pub use link::IsoTpLink;
