//! Simulated CAN bus
//!
//! A [`SimBus`] is a broadcast medium: every attached [`BusPort`] receives
//! every frame sent by any other port after it attached, in send order and
//! exactly once. Queues are unbounded, so a slow reader never causes drops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::frame::{CanFrame, FrameError};

/// Shared in-process CAN bus for one channel
#[derive(Clone)]
pub struct SimBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    channel: String,
    next_port_id: AtomicU64,
    frames_sent: AtomicU64,
    ports: Mutex<Vec<PortSlot>>,
}

struct PortSlot {
    id: u64,
    tx: mpsc::UnboundedSender<CanFrame>,
}

impl BusInner {
    /// Fan a frame out to every port except the sender.
    ///
    /// The port list stays locked for the whole fan-out so concurrent senders
    /// are serialized and all receivers observe one global order.
    fn deliver(&self, from: u64, frame: CanFrame) {
        let mut ports = self.ports.lock();
        ports.retain(|slot| slot.id == from || slot.tx.send(frame).is_ok());
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            channel = %self.channel,
            port = from,
            frame = %frame,
            "Frame sent"
        );
    }

    fn detach(&self, id: u64) {
        self.ports.lock().retain(|slot| slot.id != id);
    }
}

impl SimBus {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channel: channel.into(),
                next_port_id: AtomicU64::new(1),
                frames_sent: AtomicU64::new(0),
                ports: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Attach a new port; it sees frames sent from this point on
    pub fn attach(&self) -> BusPort {
        let id = self.inner.next_port_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.ports.lock().push(PortSlot { id, tx });
        tracing::debug!(channel = %self.inner.channel, port = id, "Port attached");

        BusPort {
            id,
            inner: self.inner.clone(),
            rx,
        }
    }

    /// Channel name this bus simulates
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Number of currently attached ports
    pub fn port_count(&self) -> usize {
        self.inner.ports.lock().len()
    }

    /// Total frames sent on the bus since creation
    pub fn frames_sent(&self) -> u64 {
        self.inner.frames_sent.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SimBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBus")
            .field("channel", &self.inner.channel)
            .field("ports", &self.port_count())
            .finish()
    }
}

/// A node's attachment point on the bus (send and receive)
pub struct BusPort {
    id: u64,
    inner: Arc<BusInner>,
    rx: mpsc::UnboundedReceiver<CanFrame>,
}

impl BusPort {
    /// Port identifier, unique per bus
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Broadcast a frame to all other ports. Never blocks.
    pub fn send(&self, frame: CanFrame) {
        self.inner.deliver(self.id, frame);
    }

    /// Build and broadcast a frame from raw parts
    pub fn send_raw(&self, id: u32, data: &[u8]) -> Result<(), FrameError> {
        let frame = CanFrame::with_auto_id(id, data)?;
        self.send(frame);
        Ok(())
    }

    /// Wait up to `timeout` for the next frame
    ///
    /// Returns `None` when nothing arrived in time. That is the normal idle
    /// outcome, so callers poll this in a loop.
    pub async fn receive(&mut self, timeout: Duration) -> Option<CanFrame> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(frame) => frame,
            Err(_) => None,
        }
    }

    /// Take the next frame if one is already queued
    pub fn try_receive(&mut self) -> Option<CanFrame> {
        self.rx.try_recv().ok()
    }

    /// Send-only handle usable from any thread or callback
    pub fn sender(&self) -> BusSender {
        BusSender {
            port_id: self.id,
            inner: self.inner.clone(),
        }
    }
}

impl Drop for BusPort {
    fn drop(&mut self) {
        self.inner.detach(self.id);
        tracing::debug!(channel = %self.inner.channel, port = self.id, "Port detached");
    }
}

/// Cloneable transmit half of a [`BusPort`]
///
/// Frames sent through it are attributed to the originating port, so that
/// port does not receive them back.
#[derive(Clone)]
pub struct BusSender {
    port_id: u64,
    inner: Arc<BusInner>,
}

impl BusSender {
    pub fn send(&self, frame: CanFrame) {
        self.inner.deliver(self.port_id, frame);
    }

    pub fn send_raw(&self, id: u32, data: &[u8]) -> Result<(), FrameError> {
        let frame = CanFrame::with_auto_id(id, data)?;
        self.send(frame);
        Ok(())
    }
}
