//! uds-client - UDS (ISO 14229) client over ISO-TP
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 UdsClient                     │
//! │  typed services, DID layouts (DidCodec),      │
//! │  response classification                      │
//! │                     │                         │
//! │           ┌─────────┴────────┐                │
//! │           │ TransportAdapter │                │
//! │           └─────────┬────────┘                │
//! │       ┌─────────────┴─────────────┐           │
//! │  SimCanAdapter               MockTransport    │
//! │  (IsoTpLink on a SimBus)     (canned answers) │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let bus = sim_can::SimBus::new("vcan0");
//! let config = ClientConfig::default();
//! let transport = SimCanAdapter::new(&bus, config.link_config()?, config.response_timing())?;
//! let client = UdsClient::new(Arc::new(transport), config)?;
//! let value = client.read_did(0x0003).await?;
//! ```

pub mod codec;
pub mod config;
pub mod transport;
pub mod uds;

pub use codec::{CodecError, DidCodec, DidValue};
pub use config::{parse_can_id, parse_did, ClientConfig, IsoTpParams, MockConfig};
pub use transport::{
    MockTransportAdapter, ResponseTiming, SimCanAdapter, TransportAdapter, TransportError,
};
pub use uds::{
    DownloadResponse, MemoryLocation, NegativeResponseCode, ResponseStatus, RoutineResult,
    SessionTiming, UdsClient, UdsError, UdsResponse,
};
