//! In-memory bus traffic recorder
//!
//! Attaches its own port, so it sees every frame from every other party.
//! [`TrafficLog::to_candump`] renders the capture in `candump -l` format,
//! with timestamps relative to the start of the capture.

use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sim_can::{BusPort, CanFrame, SimBus};
use tokio::task::JoinHandle;

use crate::dut::StopSignal;

const RECEIVE_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedFrame {
    /// Time since the capture started
    pub offset: Duration,
    pub frame: CanFrame,
}

pub struct TrafficLog {
    channel: String,
    frames: Arc<Mutex<Vec<CapturedFrame>>>,
    stop: StopSignal,
    task: Option<JoinHandle<()>>,
}

impl TrafficLog {
    /// Start recording; must be called from within a tokio runtime
    pub fn start(bus: &SimBus) -> Self {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let stop = StopSignal::new();
        let port = bus.attach();
        let task = tokio::spawn(record(port, frames.clone(), stop.clone(), Instant::now()));
        tracing::debug!(channel = bus.channel(), "Traffic capture started");

        Self {
            channel: bus.channel().to_string(),
            frames,
            stop,
            task: Some(task),
        }
    }

    /// Snapshot of everything captured so far
    pub fn frames(&self) -> Vec<CapturedFrame> {
        self.frames.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Stop recording and release the bus port
    pub async fn stop(&mut self) {
        self.stop.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Traffic capture task ended abnormally");
            }
        }
    }

    /// One `(seconds.micros) <channel> <ID>#<DATA>` line per frame
    pub fn to_candump(&self) -> String {
        let mut out = String::new();
        for captured in self.frames.lock().iter() {
            let _ = writeln!(
                out,
                "({}.{:06}) {} {}",
                captured.offset.as_secs(),
                captured.offset.subsec_micros(),
                self.channel,
                captured.frame
            );
        }
        out
    }
}

impl Drop for TrafficLog {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn record(
    mut port: BusPort,
    frames: Arc<Mutex<Vec<CapturedFrame>>>,
    stop: StopSignal,
    started: Instant,
) {
    let capture = |frame: CanFrame| CapturedFrame {
        offset: frame
            .timestamp()
            .checked_duration_since(started)
            .unwrap_or_default(),
        frame,
    };

    while !stop.is_stopped() {
        if let Some(frame) = port.receive(RECEIVE_TIMEOUT).await {
            frames.lock().push(capture(frame));
        }
    }
    while let Some(frame) = port.try_receive() {
        frames.lock().push(capture(frame));
    }
    tracing::debug!(frames = frames.lock().len(), "Traffic capture stopped");
}
