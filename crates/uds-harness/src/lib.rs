//! uds-harness - conformance harness for poll-driven UDS servers
//!
//! Puts a device under test (anything implementing [`Dut`]) and a
//! [`uds_client::UdsClient`] on one simulated CAN bus and keeps three timing
//! domains apart: client requests await responses, the bus delivers frames
//! asynchronously and the DUT only moves when it is fed a frame or polled.
//!
//! # Example
//!
//! ```ignore
//! use uds_harness::{run, HarnessConfig};
//!
//! #[tokio::test(flavor = "multi_thread")]
//! async fn reads_a_did() {
//!     let dut = Box::new(example_ecu::HarnessEcu::new(Default::default()).unwrap());
//!     run(HarnessConfig::default(), dut, |ctx| async move {
//!         let value = ctx.client.read_did(0x0003).await.unwrap();
//!         assert_eq!(value.to_string(), "(3,)");
//!     })
//!     .await
//!     .unwrap();
//! }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod dut;
pub mod error;
pub mod events;
pub mod harness;
pub mod logging;
pub mod traffic;

pub use client::ClientAdapter;
pub use clock::MockClock;
pub use config::{DriverConfig, HarnessConfig, ObserverConfig};
pub use dut::{Dut, DutDriver, SendCallback, StopSignal};
pub use error::{HarnessError, HarnessResult};
pub use events::{CounterReader, EventCounter, EventCounters, EventObserver};
pub use harness::{run, DutHandle, Harness, HarnessContext, LifecycleState};
pub use logging::init_test_logging;
pub use traffic::{CapturedFrame, TrafficLog};
