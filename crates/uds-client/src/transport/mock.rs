//! Mock transport adapter for testing

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::{AddressInfo, IncomingMessage, TransportAdapter, TransportError};
use crate::config::MockConfig;

/// Mock transport adapter for testing
///
/// Answers from a request -> response table. Exact matches win over prefix
/// matches; anything else gets a bare positive response.
pub struct MockTransportAdapter {
    config: MockConfig,
    connected: AtomicBool,
    incoming_tx: broadcast::Sender<IncomingMessage>,
    /// Predefined responses for testing (request -> response mapping)
    responses: RwLock<Vec<(Vec<u8>, Vec<u8>)>>,
    /// Every request seen, in order
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockTransportAdapter {
    pub fn new(config: &MockConfig) -> Self {
        let (incoming_tx, _) = broadcast::channel(256);
        Self {
            config: config.clone(),
            connected: AtomicBool::new(true),
            incoming_tx,
            responses: RwLock::new(Self::default_responses()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Add a mock response for a given request
    ///
    /// Later entries take precedence over earlier ones, including defaults.
    pub fn add_response(&self, request: Vec<u8>, response: Vec<u8>) {
        self.responses.write().insert(0, (request, response));
    }

    /// Inject an incoming message (simulates unsolicited ECU traffic)
    pub fn inject_incoming(&self, data: Vec<u8>) {
        let msg = IncomingMessage {
            timestamp: Instant::now(),
            data,
            source: self.address_info(),
        };
        let _ = self.incoming_tx.send(msg);
    }

    /// Set connection state
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Requests received so far
    pub fn sent_requests(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    fn default_responses() -> Vec<(Vec<u8>, Vec<u8>)> {
        vec![
            // Session control: P2 = 50 ms, P2* = 2000 ms (200 x 10 ms)
            (vec![0x10, 0x01], vec![0x50, 0x01, 0x00, 0x32, 0x00, 0xC8]),
            (vec![0x10, 0x02], vec![0x50, 0x02, 0x00, 0x32, 0x00, 0xC8]),
            (vec![0x10, 0x03], vec![0x50, 0x03, 0x00, 0x32, 0x00, 0xC8]),
            (vec![0x11, 0x01], vec![0x51, 0x01, 0x00]),
            (vec![0x3E, 0x00], vec![0x7E, 0x00]),
            (vec![0x3E, 0x80], vec![]),
            // Harness DIDs, little-endian
            (vec![0x22, 0x00, 0x00], vec![0x62, 0x00, 0x00, 0x00]),
            (vec![0x22, 0x00, 0x01], vec![0x62, 0x00, 0x01, 0x01]),
            (vec![0x22, 0x00, 0x02], vec![0x62, 0x00, 0x02, 0x02, 0x00]),
            (vec![0x22, 0x00, 0x03], vec![0x62, 0x00, 0x03, 0x03, 0x00]),
            (
                vec![0x22, 0x00, 0x04],
                vec![0x62, 0x00, 0x04, 0x04, 0x00, 0x00, 0x00],
            ),
            (
                vec![0x22, 0x00, 0x03, 0x00, 0x04],
                vec![
                    0x62, 0x00, 0x03, 0x03, 0x00, //
                    0x00, 0x04, 0x04, 0x00, 0x00, 0x00,
                ],
            ),
            (
                vec![0x19, 0x02],
                vec![
                    0x59, 0x02, 0xFF, // status availability
                    0x01, 0x23, 0x45, 0x09, // active
                    0x06, 0x78, 0x90, 0x28,
                ],
            ),
            (vec![0x14, 0xFF, 0xFF, 0xFF], vec![0x54]),
            (
                vec![0x31, 0x01, 0xFF, 0x00],
                vec![0x71, 0x01, 0xFF, 0x00, 0x00],
            ),
        ]
    }

    fn find_response(&self, request: &[u8]) -> Option<Vec<u8>> {
        let responses = self.responses.read();

        if let Some((_, resp)) = responses.iter().find(|(req, _)| req == request) {
            return Some(resp.clone());
        }

        // Then try prefix match for variable-length requests
        if let Some((_, resp)) = responses.iter().find(|(req, _)| request.starts_with(req)) {
            return Some(resp.clone());
        }

        request
            .first()
            .map(|sid| vec![sid.wrapping_add(crate::uds::service_id::POSITIVE_RESPONSE_OFFSET)])
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }
}

#[async_trait]
impl TransportAdapter for MockTransportAdapter {
    async fn send_receive(
        &self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.sent.lock().push(request.to_vec());

        if Duration::from_millis(self.config.latency_ms) > timeout {
            tokio::time::sleep(timeout).await;
            return Err(TransportError::Timeout("Response timeout".to_string()));
        }
        self.simulate_latency().await;

        self.find_response(request)
            .ok_or_else(|| TransportError::ReceiveFailed("No mock response configured".to_string()))
    }

    async fn send(&self, request: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.sent.lock().push(request.to_vec());
        self.simulate_latency().await;

        tracing::debug!(request = %hex::encode_upper(request), "Mock transport: sent message");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<IncomingMessage> {
        self.incoming_tx.subscribe()
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn address_info(&self) -> AddressInfo {
        AddressInfo {
            tx_id: 0x7A0,
            rx_id: 0x7A8,
        }
    }
}
