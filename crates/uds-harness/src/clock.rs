//! Mock millisecond clock shared by the DUT driver and the event observer
//!
//! Only the driver's poll loop advances it, so DUT time and observer
//! deadlines are one and the same time base.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct MockClock {
    ms: Arc<AtomicU32>,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mock time in milliseconds
    pub fn now_ms(&self) -> u32 {
        self.ms.load(Ordering::Acquire)
    }

    /// Move the clock forward to `ms`; earlier values are ignored
    ///
    /// Returns the clock value after the merge.
    pub fn advance_to(&self, ms: u32) -> u32 {
        self.ms.fetch_max(ms, Ordering::AcqRel).max(ms)
    }

    /// Milliseconds passed since `start` (a previous `now_ms()` reading)
    pub fn elapsed_since(&self, start: u32) -> u32 {
        self.now_ms().saturating_sub(start)
    }
}
