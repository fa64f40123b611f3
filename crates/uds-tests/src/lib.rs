//! Conformance tests for the reference ECU
//!
//! Every test starts a fresh harness: simulated bus, the ECU behind its
//! receive and poll loops, and a UDS client. Nothing is shared between
//! tests, so they run in parallel.
//!
//! ```bash
//! cargo test -p uds-tests
//! RUST_LOG=debug cargo test -p uds-tests -- --nocapture
//! ```
//!
//! # Test Structure
//!
//! - `services.rs` - single request/response services and negative responses
//! - `session.rs` - session timing, S3 fallback and tester present
//! - `programming.rs` - erase routine and download into the mock flash
//! - `lifecycle.rs` - setup failure and teardown

use uds_client::{MemoryLocation, UdsClient, UdsError};
use uds_harness::HarnessConfig;

/// DID holding the active diagnostic session
pub const ACTIVE_SESSION_DID: u16 = 0xF186;

/// Harness defaults plus a layout for the active session DID
pub fn harness_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config
        .client
        .data_identifiers
        .insert(format!("0x{:04X}", ACTIVE_SESSION_DID), "B".to_string());
    config
}

/// Deterministic, non-erased test image
pub fn firmware_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// RequestDownload, TransferData for every block, RequestTransferExit
///
/// Returns the number of TransferData blocks sent.
pub async fn download(client: &UdsClient, address: u32, image: &[u8]) -> Result<usize, UdsError> {
    let location = MemoryLocation::new(address, image.len() as u32);
    let response = client.request_download(location, 0x00).await?;

    // maxNumberOfBlockLength counts the SID and the block sequence counter
    let block_len = response.max_block_length.saturating_sub(2);
    if block_len == 0 {
        return Err(UdsError::InvalidResponse(format!(
            "maxNumberOfBlockLength {} leaves no room for data",
            response.max_block_length
        )));
    }

    let mut blocks = 0;
    for (i, chunk) in image.chunks(block_len).enumerate() {
        let counter = ((i + 1) & 0xFF) as u8;
        client.transfer_data(counter, chunk).await?;
        blocks += 1;
    }
    client.request_transfer_exit(&[]).await?;

    tracing::info!(
        address = format!("0x{:08X}", address),
        bytes = image.len(),
        blocks,
        "Download finished"
    );
    Ok(blocks)
}
