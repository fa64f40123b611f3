//! Transport adapter trait and types

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::TransportError;

/// Incoming message from the transport layer
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Timestamp when the message was reassembled
    pub timestamp: Instant,
    /// Raw UDS payload data
    pub data: Vec<u8>,
    /// Source address information
    pub source: AddressInfo,
}

/// ISO-TP address pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressInfo {
    /// Transmit ID (tester -> ECU)
    pub tx_id: u32,
    /// Receive ID (ECU -> tester)
    pub rx_id: u32,
}

/// Transport-agnostic interface for UDS communication
///
/// Implementations move whole UDS messages; segmentation and flow control
/// happen below this trait.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Send a UDS request and wait for the matching response
    ///
    /// A response matches when it is the positive response to the request's
    /// service (`SID + 0x40`) or a negative response naming that service.
    /// Negative responses are returned as data, not as errors.
    async fn send_receive(
        &self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Send a UDS request without waiting for a response
    ///
    /// Used for tester present with suppress positive response.
    async fn send(&self, request: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to every reassembled incoming message
    fn subscribe(&self) -> broadcast::Receiver<IncomingMessage>;

    /// Check if the transport is connected
    async fn is_connected(&self) -> bool;

    /// Attempt to reconnect if disconnected
    async fn reconnect(&self) -> Result<(), TransportError>;

    /// Get the current address configuration
    fn address_info(&self) -> AddressInfo;
}
