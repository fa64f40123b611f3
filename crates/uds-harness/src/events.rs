//! Named DUT event counters and the observer that waits on them
//!
//! DUT logic owns [`EventCounters`] and increments individual
//! [`EventCounter`] handles from inside its entry points. The harness only
//! ever sees a [`CounterReader`], so nothing on the test side can move a
//! counter. [`EventObserver`] turns "did the DUT do X" into a wait bounded by
//! mock time rather than wall-clock time.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::clock::MockClock;
use crate::config::ObserverConfig;
use crate::dut::StopSignal;
use crate::error::{HarnessError, HarnessResult};

// =============================================================================
// Counters
// =============================================================================

/// Registry of named, monotonically non-decreasing counters
#[derive(Debug, Clone, Default)]
pub struct EventCounters {
    inner: Arc<RwLock<HashMap<String, Arc<AtomicU32>>>>,
}

impl EventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the handle for `name`, creating the counter at zero if needed
    pub fn register(&self, name: &str) -> EventCounter {
        if let Some(counter) = self.inner.read().get(name) {
            return EventCounter(counter.clone());
        }
        let mut map = self.inner.write();
        let counter = map
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)));
        EventCounter(counter.clone())
    }

    /// Current value; unknown names read as zero
    pub fn get(&self, name: &str) -> u32 {
        self.inner
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u32> {
        self.inner
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), c.load(Ordering::Acquire)))
            .collect()
    }

    /// Read-only view for the harness side
    pub fn reader(&self) -> CounterReader {
        CounterReader(self.clone())
    }
}

/// Increment handle for one counter
#[derive(Debug, Clone)]
pub struct EventCounter(Arc<AtomicU32>);

impl EventCounter {
    /// Add one; returns the new value. Saturates instead of wrapping.
    pub fn increment(&self) -> u32 {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_add(1))
            .unwrap_or(u32::MAX);
        previous.saturating_add(1)
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

/// Read-only access to [`EventCounters`]
#[derive(Debug, Clone)]
pub struct CounterReader(EventCounters);

impl CounterReader {
    pub fn get(&self, name: &str) -> u32 {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u32> {
        self.0.snapshot()
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Waits for DUT events against the mock clock
#[derive(Debug, Clone)]
pub struct EventObserver {
    counters: CounterReader,
    clock: MockClock,
    stop: StopSignal,
    poll_interval: Duration,
}

impl EventObserver {
    pub fn new(
        counters: CounterReader,
        clock: MockClock,
        stop: StopSignal,
        config: &ObserverConfig,
    ) -> Self {
        Self {
            counters,
            clock,
            stop,
            poll_interval: config.poll_interval(),
        }
    }

    pub fn counters(&self) -> &CounterReader {
        &self.counters
    }

    /// Current value of one counter
    pub fn count(&self, name: &str) -> u32 {
        self.counters.get(name)
    }

    /// Wait until `name` is positive or `timeout_ms` of mock time has passed
    ///
    /// Returns the counter value on success. Each iteration reads the clock
    /// before the counter, so an event counted before the deadline is never
    /// reported as a timeout.
    pub async fn wait_for_event(&self, name: &str, timeout_ms: u32) -> HarnessResult<u32> {
        if !self.counters.contains(name) {
            tracing::warn!(event = name, "Waiting for an event the DUT never registered");
        }

        let start = self.clock.now_ms();
        loop {
            let waited = self.clock.elapsed_since(start);
            let count = self.counters.get(name);
            if count > 0 {
                tracing::debug!(event = name, count, waited_ms = waited, "Event observed");
                return Ok(count);
            }

            if waited >= timeout_ms || self.stop.is_stopped() {
                tracing::debug!(event = name, waited_ms = waited, "Event wait timed out");
                return Err(HarnessError::Timeout {
                    what: format!("event '{}'", name),
                    waited_ms: waited as u64,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Like [`wait_for_event`](Self::wait_for_event) but fails the test on timeout
    pub async fn assert_event(&self, name: &str, timeout_ms: u32) -> u32 {
        match self.wait_for_event(name, timeout_ms).await {
            Ok(count) => count,
            Err(e) => panic!(
                "expected DUT event '{}' within {} ms of mock time: {}",
                name, timeout_ms, e
            ),
        }
    }
}
