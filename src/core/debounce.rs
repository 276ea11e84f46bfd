//! Debounced current-frame update - coalesces rapid scrubbing.
//!
//! When the playhead moves many times within the quiet window (e.g. a drag
//! across the timeline), only the most recent request survives:
//! 1. Each `schedule()` replaces the previous pending update outright
//! 2. After `delay` of quiet, `take_due()` hands the survivor back for a
//!    real `get_frame` call
//!
//! Earlier scheduled updates are fully discarded, not merely delayed.

use std::time::{Duration, Instant};

use super::render::{FrameCallback, SharedRenderer};
use crate::frame::Quality;

/// A scheduled update waiting out the quiet window.
pub struct PendingUpdate {
    pub frame_number: i32,
    pub quality: Quality,
    pub renderer: SharedRenderer,
    pub deliver: FrameCallback,
    due: Instant,
}

/// Debounce gate for the interactive "current frame" path.
pub struct Debouncer {
    delay: Duration,
    pending: Option<PendingUpdate>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule an update; any previously pending one is discarded and its
    /// timer restarted (debounce behavior).
    pub fn schedule(
        &mut self,
        frame_number: i32,
        quality: Quality,
        renderer: SharedRenderer,
        deliver: FrameCallback,
        now: Instant,
    ) {
        if self.pending.is_some() {
            log::trace!("Debouncer: superseding pending update");
        }
        self.pending = Some(PendingUpdate {
            frame_number,
            quality,
            renderer,
            deliver,
            due: now + self.delay,
        });
        log::trace!(
            "Debouncer: scheduled frame {} in {}ms",
            frame_number,
            self.delay.as_millis()
        );
    }

    /// Drop any pending update.
    pub fn cancel(&mut self) {
        if self.pending.is_some() {
            log::trace!("Debouncer: cancelled pending update");
        }
        self.pending = None;
    }

    /// Hand back the pending update if its quiet window has elapsed.
    /// Clears the pending state when it fires.
    pub fn take_due(&mut self, now: Instant) -> Option<PendingUpdate> {
        match &self.pending {
            Some(pending) if now >= pending.due => {
                log::trace!("Debouncer: firing frame {}", pending.frame_number);
                self.pending.take()
            }
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Frame number of the pending update (if any)
    pub fn pending_frame(&self) -> Option<i32> {
        self.pending.as_ref().map(|p| p.frame_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render::{CancelToken, RenderError, RenderFrame};
    use crate::frame::RasterFrame;
    use std::sync::Arc;

    struct NullRenderer;

    impl RenderFrame for NullRenderer {
        fn render(
            &self,
            _frame_number: i32,
            _quality: Quality,
            _cancel: &CancelToken,
        ) -> Result<Option<RasterFrame>, RenderError> {
            Ok(None)
        }
    }

    fn renderer() -> SharedRenderer {
        Arc::new(NullRenderer)
    }

    fn noop() -> FrameCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_immediate_no_trigger() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let now = Instant::now();

        debouncer.schedule(5, Quality::High, renderer(), noop(), now);
        assert!(debouncer.is_pending());

        // Should not trigger before the quiet window elapses
        assert!(debouncer.take_due(now).is_none());
        assert!(
            debouncer
                .take_due(now + Duration::from_millis(99))
                .is_none()
        );
    }

    #[test]
    fn test_trigger_after_delay() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let now = Instant::now();

        debouncer.schedule(5, Quality::High, renderer(), noop(), now);

        let fired = debouncer.take_due(now + Duration::from_millis(100));
        assert_eq!(fired.map(|p| p.frame_number), Some(5));
        assert!(!debouncer.is_pending());
    }

    /// Test: re-scheduling resets the timer and replaces parameters
    /// Validates: only the last call in a burst survives
    #[test]
    fn test_debounce_resets_timer() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let now = Instant::now();

        debouncer.schedule(1, Quality::Low, renderer(), noop(), now);
        debouncer.schedule(2, Quality::High, renderer(), noop(), now + Duration::from_millis(60));

        // First deadline passed, but the replacement restarted the window
        assert!(
            debouncer
                .take_due(now + Duration::from_millis(120))
                .is_none()
        );
        assert_eq!(debouncer.pending_frame(), Some(2));

        let fired = debouncer
            .take_due(now + Duration::from_millis(160))
            .expect("due");
        assert_eq!(fired.frame_number, 2);
        assert_eq!(fired.quality, Quality::High);
    }

    #[test]
    fn test_cancel_discards_pending() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        let now = Instant::now();

        debouncer.schedule(3, Quality::Low, renderer(), noop(), now);
        debouncer.cancel();
        assert!(!debouncer.is_pending());
        assert!(
            debouncer
                .take_due(now + Duration::from_millis(200))
                .is_none()
        );
    }
}
