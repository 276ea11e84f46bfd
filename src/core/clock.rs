//! Injectable time source for the cache and playback engine
//!
//! **Why**: Debounce windows, render timeouts and playback advance are all
//! deadline-driven. Routing every `now()` through a trait lets tests run on
//! virtual time instead of flaky wall-clock sleeps.
//!
//! **Used by**: FrameCache (timeouts, debounce), PlaybackDriver (frame
//! advance), render workers (render-time measurement)

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Shared handle passed into the engine on construction.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time. The production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Time only moves when `advance()` is called, so debounce and timeout
/// deadlines can be crossed exactly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move time forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
