//! Transport layer for UDS communication
//!
//! - [`SimCanAdapter`]: ISO-TP over a simulated CAN bus
//! - [`MockTransportAdapter`]: canned responses for unit tests

mod adapter;
pub mod error;
pub mod mock;
pub mod sim_can;

pub use adapter::{AddressInfo, IncomingMessage, TransportAdapter};
pub use error::TransportError;
pub use mock::MockTransportAdapter;
pub use sim_can::{ResponseTiming, SimCanAdapter};
