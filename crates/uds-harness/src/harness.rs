//! Harness orchestrator and the `run` test fixture
//!
//! ```text
//!            ┌──────────────────── SimBus ────────────────────┐
//!            │                       │                        │
//!    ClientAdapter             DutDriver                 TrafficLog
//!  (ISO-TP task, UdsClient)  (receive + poll tasks)    (optional recorder)
//!                                │
//!                            Box<dyn Dut> ── EventCounters ── EventObserver
//!                                │                               │
//!                                └──────── MockClock ────────────┘
//! ```
//!
//! Lifecycle: `Created -> Initialized -> Running -> Stopping -> Stopped`.
//! [`Harness::shutdown`] consumes the harness, so a stopped instance cannot
//! be touched again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use sim_can::SimBus;

use crate::client::ClientAdapter;
use crate::clock::MockClock;
use crate::config::HarnessConfig;
use crate::dut::{Dut, DutDriver};
use crate::error::{HarnessError, HarnessResult};
use crate::events::{CounterReader, EventObserver};
use crate::traffic::TrafficLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initialized,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Test-side view of the running DUT
#[derive(Debug, Clone)]
pub struct DutHandle {
    pub observer: EventObserver,
    pub clock: MockClock,
    pub bus: SimBus,
}

impl DutHandle {
    pub fn counters(&self) -> &CounterReader {
        self.observer.counters()
    }
}

/// What a test body gets from [`run`]
#[derive(Clone)]
pub struct HarnessContext {
    pub client: Arc<ClientAdapter>,
    pub dut: DutHandle,
}

pub struct Harness {
    config: HarnessConfig,
    bus: SimBus,
    driver: DutDriver,
    client: Arc<ClientAdapter>,
    observer: EventObserver,
    traffic: Option<TrafficLog>,
    state: LifecycleState,
}

impl Harness {
    /// Build the bus, bring the DUT up and open the client
    pub async fn start(config: HarnessConfig, dut: Box<dyn Dut>) -> HarnessResult<Self> {
        config.validate()?;

        let bus = SimBus::new(config.channel.clone());
        let traffic = config.capture_traffic.then(|| TrafficLog::start(&bus));
        let clock = MockClock::new();

        let mut driver = DutDriver::new(&bus, dut, clock.clone(), config.driver.clone());
        driver.initialize()?;
        driver.start()?;

        let client = match ClientAdapter::open(&bus, &config.client) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!(error = %e, "Client adapter failed to open");
                if let Err(stop_err) = driver.stop(config.shutdown_timeout()).await {
                    tracing::warn!(error = %stop_err, "DUT driver did not stop cleanly");
                }
                return Err(e);
            }
        };

        let observer = EventObserver::new(
            driver.counters().reader(),
            clock,
            driver.stop_signal(),
            &config.observer,
        );

        tracing::info!(
            channel = %config.channel,
            capture_traffic = config.capture_traffic,
            "Harness running"
        );
        Ok(Self {
            config,
            bus,
            driver,
            client,
            observer,
            traffic,
            state: LifecycleState::Running,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    pub fn client(&self) -> &Arc<ClientAdapter> {
        &self.client
    }

    pub fn observer(&self) -> &EventObserver {
        &self.observer
    }

    pub fn clock(&self) -> &MockClock {
        self.driver.clock()
    }

    pub fn traffic(&self) -> Option<&TrafficLog> {
        self.traffic.as_ref()
    }

    pub fn context(&self) -> HarnessContext {
        HarnessContext {
            client: self.client.clone(),
            dut: DutHandle {
                observer: self.observer.clone(),
                clock: self.driver.clock().clone(),
                bus: self.bus.clone(),
            },
        }
    }

    /// Stop the DUT loops, close the client and end any capture
    ///
    /// All steps run even when an earlier one fails; the first failure is
    /// returned.
    pub async fn shutdown(mut self) -> HarnessResult<()> {
        self.state = LifecycleState::Stopping;
        let timeout = self.config.shutdown_timeout();

        let mut result = self.driver.stop(timeout).await;

        if tokio::time::timeout(timeout, self.client.close()).await.is_err() {
            tracing::warn!("Client transport did not stop in time");
            if result.is_ok() {
                result = Err(HarnessError::TaskFailed(
                    "client transport did not stop in time".into(),
                ));
            }
        }

        if let Some(mut traffic) = self.traffic.take() {
            traffic.stop().await;
            tracing::debug!(
                frames = traffic.len(),
                "Captured traffic:\n{}",
                traffic.to_candump()
            );
        }

        self.state = LifecycleState::Stopped;
        tracing::info!(mock_ms = self.driver.clock().now_ms(), "Harness stopped");
        result
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if self.state != LifecycleState::Stopped {
            // DutDriver and TrafficLog abort their tasks when dropped; the
            // client's receive task lives until the last context clone goes
            tracing::warn!(
                state = %self.state,
                "Harness dropped without shutdown, skipping graceful DUT stop"
            );
        }
    }
}

/// Run `body` against a fresh harness and always tear it down
///
/// The body is called and awaited inside its own task. When it panics, even
/// while building its future, the harness is still shut down, then the panic
/// is re-raised so the test fails with the original message.
pub async fn run<F, Fut, T>(config: HarnessConfig, dut: Box<dyn Dut>, body: F) -> HarnessResult<T>
where
    F: FnOnce(HarnessContext) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let harness = Harness::start(config, dut).await?;
    let ctx = harness.context();
    let outcome = tokio::spawn(async move { body(ctx).await }).await;
    let shutdown = harness.shutdown().await;

    match outcome {
        Ok(value) => shutdown.map(|()| value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(HarnessError::TaskFailed(e.to_string())),
    }
}
