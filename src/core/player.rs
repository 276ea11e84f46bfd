//! Playback driver with frame-accurate timing and adaptive quality
//!
//! **Why**: Smooth playback requires:
//! - Drift-free timing (advance by consumed whole intervals, not wall-clock)
//! - Cheap low-quality frames while playing, full quality when parked
//! - Speculative preload around an idle playhead
//!
//! **Used by**: the interactive loop (one `tick()` per scheduler callback),
//! timeline scrubbing (debounced), demo binary
//!
//! # Timing Model
//!
//! Each frame has a fixed duration `1 / (fps * speed)`. On every tick the
//! driver advances by the number of whole intervals that elapsed and moves
//! its last-tick marker by exactly the consumed time - the remainder
//! carries into the next tick, so error never accumulates.
//!
//! # Quality Policy
//!
//! `Low` while playing, `High` while paused or stopped. Preload fires only
//! when not playing, centered on the current frame.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::clock::SharedClock;
use super::frame_cache::FrameCache;
use super::render::SharedRenderer;
use crate::frame::{Quality, RasterFrame};

/// Playback state as supplied by the timeline position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

/// Driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackOptions {
    pub fps: f32,
    /// Playback speed multiplier (> 0)
    pub speed: f32,
    /// Loop to frame zero at the end instead of stopping
    pub looping: bool,
    /// Content length in frames
    pub duration_frames: i32,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            fps: 24.0,
            speed: 1.0,
            looping: true,
            duration_frames: 0,
        }
    }
}

/// One reading from the timeline position source.
#[derive(Debug, Clone, Copy)]
pub struct TimelineSnapshot {
    pub frame: i32,
    /// Time-per-pixel scalar (> 0), used for scrub mapping
    pub zoom: f32,
    pub state: PlayState,
    pub speed: f32,
    /// Shot-list identity; a change forces full cache teardown
    pub shot_list: Uuid,
}

/// Converts wall-clock time into discrete frame advances and feeds the
/// frame cache: low-quality requests while playing, debounced scrubbing
/// and spiral preload while parked.
///
/// The driver is also the presentation boundary: it retains the last good
/// raster, so an absent result never blanks the display.
pub struct PlaybackDriver {
    clock: SharedClock,
    fps: f32,
    speed: f32,
    zoom: f32,
    looping: bool,
    duration_frames: i32,

    state: PlayState,
    position: i32,
    last_tick: Option<Instant>,
    /// Last frame requested from the cache while playing
    requested_frame: Option<i32>,
    /// Center of the most recent idle preload
    preload_center: Option<i32>,
    shot_list: Option<Uuid>,

    present_tx: crossbeam_channel::Sender<Option<RasterFrame>>,
    present_rx: crossbeam_channel::Receiver<Option<RasterFrame>>,
    last_good: Option<RasterFrame>,
}

impl PlaybackDriver {
    pub fn new(options: PlaybackOptions, clock: SharedClock) -> Self {
        let (present_tx, present_rx) = crossbeam_channel::unbounded();
        info!(
            "PlaybackDriver created: {} frames @ {} fps, loop={}",
            options.duration_frames, options.fps, options.looping
        );

        Self {
            clock,
            fps: options.fps.max(0.001),
            speed: options.speed.max(0.001),
            zoom: 1.0,
            looping: options.looping,
            duration_frames: options.duration_frames.max(0),
            state: PlayState::Stopped,
            position: 0,
            last_tick: None,
            requested_frame: None,
            preload_center: None,
            shot_list: None,
            present_tx,
            present_rx,
            last_good: None,
        }
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn duration_frames(&self) -> i32 {
        self.duration_frames
    }

    /// Cache quality policy: cheap frames while moving, full while parked.
    pub fn quality(&self) -> Quality {
        if self.is_playing() {
            Quality::Low
        } else {
            Quality::High
        }
    }

    /// Speed multiplier change; takes effect on the next tick.
    pub fn set_speed(&mut self, speed: f32) {
        if speed > 0.0 {
            self.speed = speed;
        }
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Timeline zoom (time-per-pixel), used for scrub mapping.
    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom > 0.0 {
            self.zoom = zoom;
        }
    }

    /// Frame delta for a pointer drag of `pixels` at the current zoom.
    pub fn frames_for_pixels(&self, pixels: f32) -> i32 {
        (pixels * self.zoom * self.fps).round() as i32
    }

    pub fn play(&mut self) {
        if self.duration_frames == 0 || self.state == PlayState::Playing {
            return;
        }
        debug!("Playback started at frame {}", self.position);
        self.state = PlayState::Playing;
        self.last_tick = None;
        self.requested_frame = None;
        self.preload_center = None;
    }

    pub fn pause(&mut self) {
        if self.state != PlayState::Playing {
            return;
        }
        debug!("Playback paused at frame {}", self.position);
        self.state = PlayState::Paused;
        // No future tick is owed once playback halts
        self.last_tick = None;
        self.preload_center = None;
    }

    pub fn stop(&mut self) {
        if self.state == PlayState::Stopped {
            return;
        }
        debug!("Playback stopped at frame {}", self.position);
        self.state = PlayState::Stopped;
        self.last_tick = None;
        self.preload_center = None;
    }

    /// Drive the engine one scheduler callback forward.
    ///
    /// While playing: advance the playhead by whole elapsed intervals and
    /// request the current frame at low quality. While parked: keep the
    /// preload radius warm around the playhead. Always pumps the cache and
    /// drains resolved rasters into the presentation slot.
    pub fn tick(&mut self, cache: &mut FrameCache, renderer: &SharedRenderer) {
        if self.state == PlayState::Playing {
            let now = self.clock.now();
            self.advance_elapsed(now);
            if self.state == PlayState::Playing {
                self.request_current(cache, renderer);
            }
        } else if self.preload_center != Some(self.position) {
            self.preload_center = Some(self.position);
            cache.preload(self.position, Quality::High, renderer);
        }

        cache.tick();
        self.drain_presented();
    }

    fn frame_interval(&self) -> Duration {
        let rate = (self.fps as f64 * self.speed as f64).max(0.001);
        Duration::from_secs_f64(1.0 / rate)
    }

    fn advance_elapsed(&mut self, now: Instant) {
        let Some(last) = self.last_tick else {
            self.last_tick = Some(now);
            return;
        };

        let interval = self.frame_interval();
        let elapsed = now.saturating_duration_since(last);
        if elapsed < interval {
            return;
        }

        let steps = (elapsed.as_secs_f64() / interval.as_secs_f64()).floor() as i32;
        // Move the marker by the consumed whole intervals only; the
        // remainder carries forward so timing error never accumulates
        self.last_tick = Some(last + interval.mul_f64(steps as f64));
        self.advance(steps);
    }

    fn advance(&mut self, steps: i32) {
        if self.duration_frames == 0 || steps <= 0 {
            return;
        }

        let next = self.position.saturating_add(steps);
        if next >= self.duration_frames {
            if self.looping {
                let wrapped = next % self.duration_frames;
                debug!("Frame loop: {} -> {}", self.position, wrapped);
                self.position = wrapped;
            } else {
                // Immediate transition; no render needs to complete first
                debug!("Reached end of content, stopping");
                self.position = self.duration_frames - 1;
                self.stop();
            }
        } else {
            self.position = next;
        }
    }

    fn request_current(&mut self, cache: &mut FrameCache, renderer: &SharedRenderer) {
        if self.requested_frame == Some(self.position) {
            return;
        }
        self.requested_frame = Some(self.position);

        let tx = self.present_tx.clone();
        cache.get_frame(
            self.position,
            self.quality(),
            renderer,
            Box::new(move |raster| {
                let _ = tx.send(raster);
            }),
        );
    }

    /// Move the playhead during interactive scrubbing. Requests are
    /// debounced: a drag across the timeline coalesces into one render for
    /// the final position.
    pub fn scrub_to(&mut self, frame: i32, cache: &mut FrameCache, renderer: &SharedRenderer) {
        self.position = self.clamp_frame(frame);
        self.requested_frame = None;
        self.preload_center = None;

        let tx = self.present_tx.clone();
        cache.debounced_update(
            self.position,
            self.quality(),
            renderer,
            Box::new(move |raster| {
                let _ = tx.send(raster);
            }),
        );
    }

    /// Step by N frames (positive = forward, negative = backward).
    /// Wraps across the content bounds when looping, clamps otherwise.
    pub fn step(&mut self, count: i32) {
        if count == 0 || self.duration_frames == 0 {
            return;
        }

        let end = self.duration_frames - 1;
        let target = self.position.saturating_add(count);

        self.position = if target > end {
            if self.looping {
                target % self.duration_frames
            } else {
                end
            }
        } else if target < 0 {
            if self.looping {
                target.rem_euclid(self.duration_frames)
            } else {
                0
            }
        } else {
            target
        };

        self.requested_frame = None;
        self.preload_center = None;
    }

    /// Jump to an absolute frame, clamped to content bounds.
    pub fn seek(&mut self, frame: i32) {
        self.position = self.clamp_frame(frame);
        self.requested_frame = None;
        self.preload_center = None;
        self.last_tick = None;
    }

    fn clamp_frame(&self, frame: i32) -> i32 {
        if self.duration_frames == 0 {
            frame.max(0)
        } else {
            frame.clamp(0, self.duration_frames - 1)
        }
    }

    /// Track the shot-list identity from the timeline source. An identity
    /// change tears the cache down completely (in-flight renders included)
    /// and rewinds to frame zero.
    pub fn sync_shot_list(&mut self, shot_list: Uuid, cache: &mut FrameCache) {
        match self.shot_list {
            Some(current) if current == shot_list => {}
            Some(current) => {
                info!("Shot list changed ({} -> {}), tearing down cache", current, shot_list);
                cache.clear();
                self.shot_list = Some(shot_list);
                self.position = 0;
                self.requested_frame = None;
                self.preload_center = None;
                self.last_good = None;
            }
            None => {
                self.shot_list = Some(shot_list);
            }
        }
    }

    /// Apply a full reading from the timeline position source.
    pub fn apply(
        &mut self,
        snapshot: &TimelineSnapshot,
        cache: &mut FrameCache,
        renderer: &SharedRenderer,
    ) {
        self.sync_shot_list(snapshot.shot_list, cache);
        self.set_speed(snapshot.speed);
        self.set_zoom(snapshot.zoom);

        match snapshot.state {
            PlayState::Playing => self.play(),
            PlayState::Paused => self.pause(),
            PlayState::Stopped => self.stop(),
        }

        if snapshot.state != PlayState::Playing && snapshot.frame != self.position {
            self.scrub_to(snapshot.frame, cache, renderer);
        }
    }

    fn drain_presented(&mut self) {
        while let Ok(raster) = self.present_rx.try_recv() {
            // Absent results keep the last good frame on screen
            if let Some(raster) = raster {
                self.last_good = Some(raster);
            }
        }
    }

    /// Latest resolved raster for the presentation sink.
    pub fn latest(&self) -> Option<&RasterFrame> {
        self.last_good.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::frame_cache::FrameCacheOptions;
    use crate::core::render::{CancelToken, RenderError, RenderFrame};
    use crate::frame::CachedFrame;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct InstantRenderer {
        calls: AtomicUsize,
    }

    impl InstantRenderer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl RenderFrame for InstantRenderer {
        fn render(
            &self,
            frame_number: i32,
            _quality: Quality,
            _cancel: &CancelToken,
        ) -> Result<Option<RasterFrame>, RenderError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(Some(RasterFrame::solid(2, 2, [frame_number as u8, 0, 0, 255])))
        }
    }

    struct FailingRenderer;

    impl RenderFrame for FailingRenderer {
        fn render(
            &self,
            _frame_number: i32,
            _quality: Quality,
            _cancel: &CancelToken,
        ) -> Result<Option<RasterFrame>, RenderError> {
            Err(RenderError::Failed("boom".into()))
        }
    }

    fn rig(duration: i32, looping: bool) -> (PlaybackDriver, FrameCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = FrameCache::with_workers(
            FrameCacheOptions {
                cache_radius: 2,
                ..Default::default()
            },
            clock.clone(),
            2,
        );
        let driver = PlaybackDriver::new(
            PlaybackOptions {
                fps: 10.0,
                speed: 1.0,
                looping,
                duration_frames: duration,
            },
            clock.clone(),
        );
        (driver, cache, clock)
    }

    fn settle(driver: &mut PlaybackDriver, cache: &mut FrameCache, renderer: &SharedRenderer) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while cache.in_flight_count() > 0 {
            driver.tick(cache, renderer);
            assert!(Instant::now() < deadline, "settle timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
        driver.tick(cache, renderer);
    }

    /// Test: drift-free advance - remainders carry into the next tick
    #[test]
    fn test_advance_consumes_whole_intervals() {
        let (mut driver, mut cache, clock) = rig(1000, true);
        let renderer: SharedRenderer = InstantRenderer::new();

        driver.play();
        driver.tick(&mut cache, &renderer); // arms the timing marker
        assert_eq!(driver.position(), 0);

        // 250ms at 10 fps = 2 whole frames, 50ms remainder
        clock.advance(Duration::from_millis(250));
        driver.tick(&mut cache, &renderer);
        assert_eq!(driver.position(), 2);

        // 60ms more: remainder 50 + 60 = 110ms = 1 more frame
        clock.advance(Duration::from_millis(60));
        driver.tick(&mut cache, &renderer);
        assert_eq!(driver.position(), 3);
    }

    /// Test: speed multiplier shortens the frame interval
    #[test]
    fn test_speed_scales_advance() {
        let (mut driver, mut cache, clock) = rig(1000, true);
        let renderer: SharedRenderer = InstantRenderer::new();

        driver.set_speed(2.0);
        driver.play();
        driver.tick(&mut cache, &renderer);

        clock.advance(Duration::from_millis(250));
        driver.tick(&mut cache, &renderer);
        // 10 fps * 2.0 speed = 50ms per frame
        assert_eq!(driver.position(), 5);
    }

    #[test]
    fn test_loop_wraps_to_zero() {
        let (mut driver, mut cache, clock) = rig(4, true);
        let renderer: SharedRenderer = InstantRenderer::new();

        driver.play();
        driver.tick(&mut cache, &renderer);
        clock.advance(Duration::from_millis(500)); // 5 frames past a 4-frame clip
        driver.tick(&mut cache, &renderer);

        assert_eq!(driver.position(), 1);
        assert!(driver.is_playing());
    }

    /// Test: non-looping playback stops at the last frame immediately
    #[test]
    fn test_end_stops_without_loop() {
        let (mut driver, mut cache, clock) = rig(4, false);
        let renderer: SharedRenderer = InstantRenderer::new();

        driver.play();
        driver.tick(&mut cache, &renderer);
        clock.advance(Duration::from_millis(1000));
        driver.tick(&mut cache, &renderer);

        assert_eq!(driver.position(), 3);
        assert_eq!(driver.state(), PlayState::Stopped);
    }

    /// Test: quality policy - low while playing, high while parked
    #[test]
    fn test_quality_policy() {
        let (mut driver, _cache, _clock) = rig(10, true);
        assert_eq!(driver.quality(), Quality::High);

        driver.play();
        assert_eq!(driver.quality(), Quality::Low);

        driver.pause();
        assert_eq!(driver.quality(), Quality::High);
    }

    /// Test: preload fires only while not playing, once per playhead move
    #[test]
    fn test_preload_only_when_idle() {
        let (mut driver, mut cache, _clock) = rig(100, true);
        let instant = InstantRenderer::new();
        let renderer: SharedRenderer = instant.clone();

        // Parked at frame 0, radius 2: spiral {0, 1, 2}
        driver.tick(&mut cache, &renderer);
        settle(&mut driver, &mut cache, &renderer);
        assert_eq!(instant.calls.load(Ordering::Relaxed), 3);
        for frame in [0, 1, 2] {
            assert!(cache.contains(frame), "frame {} preloaded", frame);
        }

        // Same playhead: no re-issue
        driver.tick(&mut cache, &renderer);
        assert_eq!(instant.calls.load(Ordering::Relaxed), 3);

        driver.play();
        driver.tick(&mut cache, &renderer);
        // Playing requests only the current frame (already cached here)
        assert_eq!(instant.calls.load(Ordering::Relaxed), 3);
        assert_eq!(cache.in_flight_count(), 0);
    }

    /// Test: the same frame is not re-requested every tick while pending
    #[test]
    fn test_current_frame_requested_once() {
        let (mut driver, mut cache, _clock) = rig(100, true);
        let renderer: SharedRenderer = InstantRenderer::new();

        driver.play();
        driver.tick(&mut cache, &renderer);
        let stats = cache.stats();
        driver.tick(&mut cache, &renderer);
        driver.tick(&mut cache, &renderer);
        assert_eq!(cache.stats().aborts, stats.aborts);
    }

    /// Test: scrubbing is debounced into one render at the final position
    #[test]
    fn test_scrub_debounced() {
        let (mut driver, mut cache, clock) = rig(100, true);
        let instant = InstantRenderer::new();
        let renderer: SharedRenderer = instant.clone();

        driver.scrub_to(10, &mut cache, &renderer);
        driver.scrub_to(20, &mut cache, &renderer);
        driver.scrub_to(30, &mut cache, &renderer);
        assert_eq!(driver.position(), 30);

        clock.advance(Duration::from_millis(100));
        cache.tick();
        settle(&mut driver, &mut cache, &renderer);

        assert!(cache.contains(30));
        assert!(!cache.contains(10));
        assert!(!cache.contains(20));
    }

    /// Test: the sink keeps the last good raster across failures
    #[test]
    fn test_last_good_retention() {
        let (mut driver, mut cache, clock) = rig(100, true);
        let renderer: SharedRenderer = InstantRenderer::new();

        driver.scrub_to(5, &mut cache, &renderer);
        clock.advance(Duration::from_millis(100));
        cache.tick();
        settle(&mut driver, &mut cache, &renderer);
        assert!(driver.latest().is_some());
        let good_pixels = driver.latest().unwrap().pixels()[0];

        // A failing render resolves absent; the display keeps the old frame.
        // Frame 50 is well outside the preload radius, so it cannot be a hit.
        let failing: SharedRenderer = Arc::new(FailingRenderer);
        driver.scrub_to(50, &mut cache, &failing);
        clock.advance(Duration::from_millis(100));
        cache.tick();
        settle(&mut driver, &mut cache, &failing);

        assert_eq!(driver.latest().unwrap().pixels()[0], good_pixels);
    }

    #[test]
    fn test_step_wraps_and_clamps() {
        let (mut driver, _cache, _clock) = rig(10, true);
        driver.step(12);
        assert_eq!(driver.position(), 2);
        driver.step(-5);
        assert_eq!(driver.position(), 7);

        let (mut driver, _cache, _clock) = rig(10, false);
        driver.step(15);
        assert_eq!(driver.position(), 9);
        driver.step(-20);
        assert_eq!(driver.position(), 0);
    }

    #[test]
    fn test_seek_clamps() {
        let (mut driver, _cache, _clock) = rig(10, true);
        driver.seek(50);
        assert_eq!(driver.position(), 9);
        driver.seek(-3);
        assert_eq!(driver.position(), 0);
    }

    #[test]
    fn test_frames_for_pixels_uses_zoom() {
        let (mut driver, _cache, _clock) = rig(10, true);
        // zoom = 0.2 s/px at 10 fps: one pixel = 2 frames
        driver.set_zoom(0.2);
        assert_eq!(driver.frames_for_pixels(3.0), 6);
        assert_eq!(driver.frames_for_pixels(-1.0), -2);
    }

    /// Test: shot-list identity change tears the cache down
    #[test]
    fn test_shot_list_change_clears_cache() {
        let (mut driver, mut cache, _clock) = rig(100, true);

        let first = Uuid::new_v4();
        driver.sync_shot_list(first, &mut cache);
        cache.cache_frame(CachedFrame::new(
            1,
            Some(RasterFrame::solid(2, 2, [0, 0, 0, 255])),
            Quality::High,
            Instant::now(),
            Duration::from_millis(5),
        ));
        assert_eq!(cache.len(), 1);

        // Same identity: nothing happens
        driver.sync_shot_list(first, &mut cache);
        assert_eq!(cache.len(), 1);

        // New identity: full teardown and rewind
        driver.sync_shot_list(Uuid::new_v4(), &mut cache);
        assert!(cache.is_empty());
        assert_eq!(driver.position(), 0);
        assert!(driver.latest().is_none());
    }
}
