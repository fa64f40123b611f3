//! DUT capability interface and the driver that runs it on the bus
//!
//! A DUT is a cooperative, poll-driven protocol server. The driver gives it
//! two sources of progress, each in its own task:
//!
//! - the receive loop feeds every bus frame into [`Dut::ingest_frame`]
//! - the poll loop advances the [`MockClock`] from wall time and calls
//!   [`Dut::poll`], so timers fire even when no frame is in flight
//!
//! Both loops share one [`StopSignal`] and take the DUT lock for exactly one
//! entry point call at a time. The lock is a `parking_lot` mutex and is never
//! held across an await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sim_can::{BusPort, SimBus};
use tokio::task::JoinHandle;

use crate::clock::MockClock;
use crate::config::DriverConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::events::EventCounters;
use crate::harness::LifecycleState;

/// Outbound path handed to the DUT: `(can_id, payload) -> status`
///
/// Returns 0 when the frame went out, -1 when it was malformed.
pub type SendCallback = Box<dyn Fn(u32, &[u8]) -> i32 + Send + Sync>;

/// What the harness needs from a device under test
pub trait Dut: Send {
    /// Install the callback the DUT uses to put frames on the bus
    fn register_send_callback(&mut self, callback: SendCallback);

    /// One-time setup; 0 means ready
    fn init(&mut self) -> i32;

    /// Deliver one received CAN frame
    fn ingest_frame(&mut self, id: u32, data: &[u8]);

    /// Advance internal timers to `now_ms`; never called with a smaller value
    fn poll(&mut self, now_ms: u32);

    /// The DUT's named event counters
    fn counters(&self) -> EventCounters;
}

/// Cooperative cancellation flag shared by all harness tasks
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Shared {
    dut: Mutex<Box<dyn Dut>>,
    stop: StopSignal,
}

impl Shared {
    /// Run one DUT entry point unless teardown has started
    ///
    /// The stop flag is checked while holding the lock, so once `stop()`
    /// returns no new entry point call can begin.
    fn call(&self, f: impl FnOnce(&mut dyn Dut)) -> bool {
        let mut dut = self.dut.lock();
        if self.stop.is_stopped() {
            return false;
        }
        f(dut.as_mut());
        true
    }
}

/// Owns one DUT for the duration of a test
pub struct DutDriver {
    shared: Arc<Shared>,
    bus: SimBus,
    clock: MockClock,
    counters: EventCounters,
    config: DriverConfig,
    state: LifecycleState,
    port: Option<BusPort>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl DutDriver {
    pub fn new(bus: &SimBus, dut: Box<dyn Dut>, clock: MockClock, config: DriverConfig) -> Self {
        let counters = dut.counters();
        Self {
            shared: Arc::new(Shared {
                dut: Mutex::new(dut),
                stop: StopSignal::new(),
            }),
            bus: bus.clone(),
            clock,
            counters,
            config,
            state: LifecycleState::Created,
            port: None,
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn clock(&self) -> &MockClock {
        &self.clock
    }

    pub fn counters(&self) -> &EventCounters {
        &self.counters
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.shared.stop.clone()
    }

    /// Attach to the bus, register the send callback and run `init()`
    ///
    /// A non-zero init status leaves the driver in `Created` and returns
    /// [`HarnessError::SetupFailure`].
    pub fn initialize(&mut self) -> HarnessResult<()> {
        self.expect_state(LifecycleState::Created)?;

        let port = self.bus.attach();
        let sender = port.sender();
        let callback: SendCallback = Box::new(move |id, data| match sender.send_raw(id, data) {
            Ok(()) => 0,
            Err(e) => {
                tracing::warn!(
                    can_id = format!("0x{:03X}", id),
                    data = %hex::encode_upper(data),
                    error = %e,
                    "DUT sent a malformed frame"
                );
                -1
            }
        });

        let status = {
            let mut dut = self.shared.dut.lock();
            dut.register_send_callback(callback);
            dut.init()
        };
        if status != 0 {
            tracing::error!(status, "DUT initialization failed");
            return Err(HarnessError::SetupFailure { status });
        }

        tracing::debug!(channel = self.bus.channel(), port = port.id(), "DUT initialized");
        self.port = Some(port);
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    /// Start the receive and poll loops
    pub fn start(&mut self) -> HarnessResult<()> {
        self.expect_state(LifecycleState::Initialized)?;
        let port = self.port.take().ok_or(HarnessError::InvalidState {
            expected: LifecycleState::Initialized,
            actual: self.state,
        })?;

        let receive = tokio::spawn(receive_loop(
            port,
            self.shared.clone(),
            self.config.receive_timeout(),
        ));
        let poll = tokio::spawn(poll_loop(
            self.shared.clone(),
            self.clock.clone(),
            self.config.poll_interval(),
        ));
        self.tasks.push(("receive", receive));
        self.tasks.push(("poll", poll));

        tracing::info!(
            channel = self.bus.channel(),
            receive_timeout_ms = self.config.receive_timeout_ms,
            poll_interval_ms = self.config.poll_interval_ms,
            "DUT driver running"
        );
        self.state = LifecycleState::Running;
        Ok(())
    }

    /// Signal both loops and join them, waiting at most `join_timeout` each
    ///
    /// A task that does not finish in time is aborted and reported as
    /// [`HarnessError::TaskFailed`]; the driver ends up stopped either way.
    pub async fn stop(&mut self, join_timeout: Duration) -> HarnessResult<()> {
        if self.state == LifecycleState::Stopped {
            return Ok(());
        }
        self.state = LifecycleState::Stopping;
        {
            // Wait out an entry point that is already running
            let _dut = self.shared.dut.lock();
            self.shared.stop.stop();
        }
        self.port = None;

        let mut failure = None;
        for (name, handle) in self.tasks.drain(..) {
            let abort = handle.abort_handle();
            match tokio::time::timeout(join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %e, "DUT task ended abnormally");
                    failure.get_or_insert_with(|| format!("{} loop: {}", name, e));
                }
                Err(_) => {
                    abort.abort();
                    tracing::warn!(task = name, "DUT task did not stop in time, aborted");
                    failure.get_or_insert_with(|| format!("{} loop did not stop in time", name));
                }
            }
        }

        self.state = LifecycleState::Stopped;
        tracing::debug!(mock_ms = self.clock.now_ms(), "DUT driver stopped");
        match failure {
            Some(reason) => Err(HarnessError::TaskFailed(reason)),
            None => Ok(()),
        }
    }

    fn expect_state(&self, expected: LifecycleState) -> HarnessResult<()> {
        if self.state != expected {
            return Err(HarnessError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }
}

impl Drop for DutDriver {
    fn drop(&mut self) {
        self.shared.stop.stop();
        for (_, handle) in self.tasks.drain(..) {
            handle.abort();
        }
    }
}

async fn receive_loop(mut port: BusPort, shared: Arc<Shared>, timeout: Duration) {
    let mut buf = [0u8; 8];
    while !shared.stop.is_stopped() {
        let Some(frame) = port.receive(timeout).await else {
            continue;
        };
        let len = frame.len();
        buf[..len].copy_from_slice(frame.data());
        tracing::trace!(frame = %frame, "DUT <- bus");
        if !shared.call(|dut| dut.ingest_frame(frame.id(), &buf[..len])) {
            break;
        }
    }
    tracing::debug!(port = port.id(), "DUT receive loop stopped");
}

async fn poll_loop(shared: Arc<Shared>, clock: MockClock, interval: Duration) {
    let started = Instant::now();
    while !shared.stop.is_stopped() {
        let elapsed = u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX);
        let now = clock.advance_to(elapsed);
        if !shared.call(|dut| dut.poll(now)) {
            break;
        }
        tokio::time::sleep(interval).await;
    }
    tracing::debug!(mock_ms = clock.now_ms(), "DUT poll loop stopped");
}
