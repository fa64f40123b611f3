//! ISO-TP transport over the simulated CAN bus

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sim_can::{BusPort, CanFrame, SimBus};
use tokio::sync::broadcast;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uds_isotp::{IsoTpLink, LinkConfig};

use crate::transport::{AddressInfo, IncomingMessage, TransportAdapter, TransportError};
use crate::uds::{service_id, NegativeResponseCode};

/// How long the transport task waits on the bus before ticking the link
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Server response deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseTiming {
    /// Time allowed for the first response to a request
    pub p2: Duration,
    /// Time allowed after each "response pending" (NRC 0x78)
    pub p2_star: Duration,
}

impl Default for ResponseTiming {
    fn default() -> Self {
        Self {
            p2: Duration::from_millis(1500),
            p2_star: Duration::from_millis(5000),
        }
    }
}

struct Outgoing {
    payload: Vec<u8>,
    done: oneshot::Sender<Result<(), TransportError>>,
}

/// Interest in the response to one outstanding request
///
/// The transport task forwards every message that answers `service_id`
/// (positive, or negative naming it) until the slot is retracted.
struct PendingRequest {
    service_id: u8,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

type PendingSlot = Arc<Mutex<Option<PendingRequest>>>;

/// Retracts the pending registration however the request ends
struct SlotGuard<'a>(&'a PendingSlot);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

enum Event {
    Frame(CanFrame),
    Send(Outgoing),
    Idle,
}

/// UDS transport that runs its own ISO-TP link on a [`SimBus`] port
///
/// A background task owns the port and the link: it feeds received frames
/// into the link, ticks its timers, puts queued frames on the bus and
/// broadcasts every reassembled message. Requests are serialized, so only
/// one `send_receive` is in flight at a time and a single pending slot is
/// enough to route responses back to it.
pub struct SimCanAdapter {
    address_info: AddressInfo,
    timing: ResponseTiming,
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    incoming_tx: broadcast::Sender<IncomingMessage>,
    pending: PendingSlot,
    running: Arc<AtomicBool>,
    request_lock: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimCanAdapter {
    /// Attach to `bus` and start the transport task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        bus: &SimBus,
        link: LinkConfig,
        timing: ResponseTiming,
    ) -> Result<Self, TransportError> {
        if link.tx_id == link.rx_id {
            return Err(TransportError::InvalidConfig(format!(
                "tx_id and rx_id are both 0x{:03X}",
                link.tx_id
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::ConnectionFailed(format!("No tokio runtime: {}", e)))?;

        let address_info = AddressInfo {
            tx_id: link.tx_id,
            rx_id: link.rx_id,
        };
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, _) = broadcast::channel(1024);
        let running = Arc::new(AtomicBool::new(true));
        let pending: PendingSlot = Arc::new(Mutex::new(None));

        let port = bus.attach();
        tracing::info!(
            channel = bus.channel(),
            tx_id = format!("0x{:03X}", link.tx_id),
            rx_id = format!("0x{:03X}", link.rx_id),
            "Opening ISO-TP transport"
        );

        let handle = runtime.spawn(run_link(
            port,
            IsoTpLink::new(link),
            outgoing_rx,
            incoming_tx.clone(),
            pending.clone(),
            running.clone(),
        ));

        Ok(Self {
            address_info,
            timing,
            outgoing_tx,
            incoming_tx,
            pending,
            running,
            request_lock: tokio::sync::Mutex::new(()),
            task: Mutex::new(Some(handle)),
        })
    }

    pub fn timing(&self) -> ResponseTiming {
        self.timing
    }

    /// Stop the transport task and wait for it to release the bus port
    pub async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Transport task ended abnormally");
            }
            tracing::debug!(
                tx_id = format!("0x{:03X}", self.address_info.tx_id),
                "ISO-TP transport closed"
            );
        }
    }
}

impl Drop for SimCanAdapter {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

/// Outcome of matching one incoming message against a pending request
enum ResponseMatch {
    Final,
    Pending,
    Unrelated,
}

fn match_response(request_sid: u8, data: &[u8]) -> ResponseMatch {
    match data {
        [sid, ..] if *sid == request_sid.wrapping_add(service_id::POSITIVE_RESPONSE_OFFSET) => {
            ResponseMatch::Final
        }
        [service_id::NEGATIVE_RESPONSE, sid, nrc, ..] if *sid == request_sid => {
            if NegativeResponseCode::from(*nrc) == NegativeResponseCode::ResponsePending {
                ResponseMatch::Pending
            } else {
                ResponseMatch::Final
            }
        }
        _ => ResponseMatch::Unrelated,
    }
}

async fn run_link(
    mut port: BusPort,
    mut link: IsoTpLink,
    mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
    incoming_tx: broadcast::Sender<IncomingMessage>,
    pending: PendingSlot,
    running: Arc<AtomicBool>,
) {
    let started = Instant::now();
    let source = AddressInfo {
        tx_id: link.tx_id(),
        rx_id: link.rx_id(),
    };

    while running.load(Ordering::SeqCst) {
        let event = tokio::select! {
            frame = port.receive(POLL_INTERVAL) => frame.map(Event::Frame).unwrap_or(Event::Idle),
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(outgoing) => Event::Send(outgoing),
                None => break,
            },
        };
        let now_ms = started.elapsed().as_millis() as u64;

        match event {
            Event::Frame(frame) if frame.id() == link.rx_id() => {
                if let Err(e) = link.on_frame(frame.data(), now_ms) {
                    tracing::warn!(
                        rx_id = format!("0x{:03X}", link.rx_id()),
                        error = %e,
                        "Dropped malformed ISO-TP traffic"
                    );
                }
            }
            Event::Send(Outgoing { payload, done }) => {
                let result = link.send(&payload, now_ms).map_err(TransportError::from);
                let _ = done.send(result);
            }
            Event::Frame(_) | Event::Idle => {}
        }

        if let Err(e) = link.poll(now_ms) {
            tracing::warn!(error = %e, "ISO-TP transfer aborted");
        }
        for data in link.drain_outbound() {
            if let Err(e) = port.send_raw(link.tx_id(), &data) {
                tracing::error!(error = %e, "Failed to put frame on the bus");
            }
        }
        while let Some(data) = link.take_received() {
            tracing::debug!(data = %hex::encode_upper(&data), "Incoming message received");
            if let Some(request) = pending.lock().as_ref() {
                if !matches!(
                    match_response(request.service_id, &data),
                    ResponseMatch::Unrelated
                ) {
                    let _ = request.tx.send(data.clone());
                }
            }
            let _ = incoming_tx.send(IncomingMessage {
                timestamp: std::time::Instant::now(),
                data,
                source,
            });
        }
    }

    running.store(false, Ordering::SeqCst);
    tracing::debug!("Transport task stopped");
}

#[async_trait]
impl TransportAdapter for SimCanAdapter {
    async fn send_receive(
        &self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let request_sid = *request
            .first()
            .ok_or_else(|| TransportError::SendFailed("Empty request".to_string()))?;

        let _serialized = self.request_lock.lock().await;

        let (tx, mut responses) = mpsc::unbounded_channel();
        *self.pending.lock() = Some(PendingRequest {
            service_id: request_sid,
            tx,
        });
        let _slot = SlotGuard(&self.pending);

        self.send(request).await?;

        let deadline = Instant::now() + timeout;
        let mut wait_until = deadline.min(Instant::now() + self.timing.p2);

        loop {
            let response = tokio::time::timeout_at(wait_until, responses.recv()).await;
            match response {
                Ok(Some(data)) => match match_response(request_sid, &data) {
                    ResponseMatch::Pending => {
                        tracing::debug!(
                            service = format!("0x{:02X}", request_sid),
                            "Response pending, extending deadline"
                        );
                        wait_until = deadline.min(Instant::now() + self.timing.p2_star);
                    }
                    _ => return Ok(data),
                },
                Ok(None) => return Err(TransportError::ConnectionClosed),
                Err(_) => {
                    return Err(TransportError::Timeout(format!(
                        "No response to service 0x{:02X}",
                        request_sid
                    )));
                }
            }
        }
    }

    async fn send(&self, request: &[u8]) -> Result<(), TransportError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        tracing::debug!(request = %hex::encode_upper(request), "Sending UDS request");

        let (done, queued) = oneshot::channel();
        self.outgoing_tx
            .send(Outgoing {
                payload: request.to_vec(),
                done,
            })
            .map_err(|_| TransportError::ConnectionClosed)?;
        queued.await.map_err(|_| TransportError::ConnectionClosed)?
    }

    fn subscribe(&self) -> broadcast::Receiver<IncomingMessage> {
        self.incoming_tx.subscribe()
    }

    async fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.outgoing_tx.is_closed()
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(TransportError::Unsupported(
                "A closed simulated transport cannot be reopened".to_string(),
            ))
        }
    }

    fn address_info(&self) -> AddressInfo {
        self.address_info
    }
}
