//! example-ecu - reference ISO 14229 server
//!
//! A poll-driven UDS server on ISO-TP, used as the device under test of the
//! conformance harness.
//!
//! # Modules
//!
//! - [`server`] - request dispatch, P2/S3 timing and the application hooks
//! - [`harness_ecu`] - the server bound to test data and event counters
//! - [`flash`] - mock program flash for download tests
//! - [`config`] - addressing, timing and enabled services
//! - [`uds`] - UDS protocol constants and helpers

pub mod config;
pub mod flash;
pub mod harness_ecu;
pub mod server;
pub mod uds;

pub use config::{ConfigError, EcuConfig};
pub use flash::{FlashDownload, FlashError, MockFlash};
pub use harness_ecu::{default_records, HarnessEcu};
pub use server::{DownloadHandler, Nrc, Routine, ServerApp, UdsServer};
