//! Frame cache engine: bounded LRU store with render coordination
//!
//! **Why**: Interactive scrubbing needs cached pixels RAM-close, a hard cap
//! on how many frames stay resident, and render work that can be superseded
//! the instant the playhead moves on.
//!
//! **Used by**: PlaybackDriver (frame display, preload), demo binary
//!
//! # Architecture
//!
//! - **LruCache**: O(1) access, promotion and eviction via the `lru` crate;
//!   its internal order list is the access-order list, so "cache keys ==
//!   order keys" holds by construction
//! - **In-flight registry**: frame number -> generation + shared live
//!   counter; at most one live render per frame number
//! - **Worker pool**: render jobs run off-thread, results come home through
//!   a channel and are applied by the single coordinator in `tick()`
//! - **Generations**: one cache-wide monotonic counter; every request gets
//!   a unique generation, so a stale result can never impersonate a newer
//!   request for the same frame
//!
//! # Concurrency
//!
//! All mutation of the cache map, access order and registry happens through
//! `&mut self` on the owning thread. Workers only observe cancel tokens and
//! send results; the generation check happens right next to the cache write,
//! so a superseded render can never overwrite a newer entry.
//!
//! # Error policy
//!
//! Timeouts, aborts and render failures are absorbed here: the caller's
//! callback gets `None`, a log line records the reason, and nothing
//! propagates. The presentation side keeps showing the last good frame.

use log::{debug, info, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::clock::SharedClock;
use super::debounce::Debouncer;
use super::render::{CancelToken, FrameCallback, RenderError, SharedRenderer};
use super::workers::{Workers, default_worker_count};
use crate::frame::{CachedFrame, Quality, RasterFrame};

/// Immutable cache configuration, fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameCacheOptions {
    /// Frames to preload on each side of the playhead
    pub cache_radius: i32,
    /// Entry cap; least-recently-used frames are evicted past it
    pub max_cache_size: usize,
    /// Resolution scale applied by renderers for `Quality::Low`
    pub low_quality_scale: f32,
    /// Quiet window for `debounced_update`
    pub debounce_delay_ms: u64,
    /// Hard per-frame render budget
    pub render_timeout_ms: u64,
}

impl Default for FrameCacheOptions {
    fn default() -> Self {
        Self {
            cache_radius: 30,
            max_cache_size: 100,
            low_quality_scale: 0.5,
            debounce_delay_ms: 100,
            render_timeout_ms: 200,
        }
    }
}

impl FrameCacheOptions {
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

/// Cache activity counters (diagnostics only).
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    timeouts: AtomicU64,
    aborts: AtomicU64,
    failures: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

/// Point-in-time stats snapshot for the presentation/diagnostics side.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub size: usize,
    pub max_size: usize,
    pub avg_render_time_ms: f64,
    pub resident_bytes: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub timeouts: u64,
    pub aborts: u64,
    pub failures: u64,
}

/// One live render request. At most one per frame number.
struct InFlight {
    generation: u64,
    /// Shared with the worker's CancelToken; bumping it cancels the render
    live: Arc<AtomicU64>,
    deadline: Instant,
    deliver: Option<FrameCallback>,
}

/// Completed render travelling back from a worker.
struct RenderResult {
    frame_number: i32,
    generation: u64,
    quality: Quality,
    outcome: Result<Option<RasterFrame>, RenderError>,
    render_time: Duration,
}

/// Bounded LRU frame cache with cancellation-on-supersede, debouncing,
/// speculative preload and a hard render timeout.
///
/// Single-owner: all operations take `&mut self`; call `tick()` from the
/// interactive loop to apply worker results and fire deadlines.
pub struct FrameCache {
    options: FrameCacheOptions,
    clock: SharedClock,

    lru: LruCache<i32, CachedFrame>,
    in_flight: HashMap<i32, InFlight>,
    /// Cache-wide monotonic generation allocator
    generations: u64,

    workers: Workers,
    results_tx: crossbeam_channel::Sender<RenderResult>,
    results_rx: crossbeam_channel::Receiver<RenderResult>,

    debounce: Debouncer,
    stats: CacheStats,
    disposed: bool,
}

impl FrameCache {
    pub fn new(options: FrameCacheOptions, clock: SharedClock) -> Self {
        let workers = default_worker_count();
        Self::with_workers(options, clock, workers)
    }

    pub fn with_workers(options: FrameCacheOptions, clock: SharedClock, num_workers: usize) -> Self {
        let (results_tx, results_rx) = crossbeam_channel::unbounded();

        info!(
            "FrameCache created: max {} entries, radius {}, timeout {}ms, {} workers",
            options.max_cache_size, options.cache_radius, options.render_timeout_ms, num_workers
        );

        Self {
            debounce: Debouncer::new(options.debounce_delay()),
            lru: LruCache::unbounded(),
            in_flight: HashMap::new(),
            generations: 0,
            workers: Workers::new(num_workers),
            results_tx,
            results_rx,
            stats: CacheStats::default(),
            disposed: false,
            options,
            clock,
        }
    }

    pub fn options(&self) -> &FrameCacheOptions {
        &self.options
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    /// Check for a cached entry without touching the access order
    pub fn contains(&self, frame_number: i32) -> bool {
        self.lru.contains(&frame_number)
    }

    /// Peek a cached entry without touching the access order
    pub fn entry(&self, frame_number: i32) -> Option<&CachedFrame> {
        self.lru.peek(&frame_number)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Resolve a frame at the requested quality.
    ///
    /// Cache hit with `entry.quality >= quality`: the entry is promoted to
    /// most-recently-used and `deliver` fires synchronously with its raster.
    /// Miss (or cached quality insufficient): a render starts on the worker
    /// pool, superseding any render already in flight for this frame, and
    /// `deliver` fires later from `tick()` - with the raster, or with `None`
    /// on timeout / supersede / failure.
    pub fn get_frame(
        &mut self,
        frame_number: i32,
        quality: Quality,
        renderer: &SharedRenderer,
        deliver: FrameCallback,
    ) {
        if self.disposed {
            deliver(None);
            return;
        }

        let satisfied = self
            .lru
            .peek(&frame_number)
            .is_some_and(|entry| entry.quality >= quality);

        if satisfied {
            // get() promotes the entry to most-recently-used
            if let Some(entry) = self.lru.get(&frame_number) {
                self.stats.record_hit();
                deliver(entry.image.clone());
                return;
            }
        }

        self.stats.record_miss();
        self.start_render(frame_number, quality, renderer, deliver);
    }

    /// Start (or restart) the render for a frame.
    ///
    /// Any render already in flight for this frame number is marked stale
    /// first; its callback resolves to absent.
    fn start_render(
        &mut self,
        frame_number: i32,
        quality: Quality,
        renderer: &SharedRenderer,
        deliver: FrameCallback,
    ) {
        let now = self.clock.now();
        let generation = self.next_generation();

        let live = match self.in_flight.remove(&frame_number) {
            Some(prev) => {
                // Storing the new generation makes the old token stale
                prev.live.store(generation, Ordering::Relaxed);
                self.stats.record_abort();
                debug!(
                    "Superseding render for frame {} (generation {} -> {})",
                    frame_number, prev.generation, generation
                );
                if let Some(prev_deliver) = prev.deliver {
                    prev_deliver(None);
                }
                prev.live
            }
            None => Arc::new(AtomicU64::new(generation)),
        };

        self.in_flight.insert(
            frame_number,
            InFlight {
                generation,
                live: Arc::clone(&live),
                deadline: now + self.options.render_timeout(),
                deliver: Some(deliver),
            },
        );

        let token = CancelToken::new(live, generation);
        let tx = self.results_tx.clone();
        let renderer = Arc::clone(renderer);
        let clock = Arc::clone(&self.clock);

        self.workers.execute(move || {
            let started = clock.now();
            let outcome = if token.is_cancelled() {
                Ok(None)
            } else {
                renderer.render(frame_number, quality, &token)
            };
            let render_time = clock.now().saturating_duration_since(started);
            // Send failure means the cache is gone; nothing left to do
            let _ = tx.send(RenderResult {
                frame_number,
                generation: token.generation(),
                quality,
                outcome,
                render_time,
            });
        });
    }

    /// Insert or overwrite an entry, promote it to most-recently-used, then
    /// evict from the least-recently-used end while over capacity.
    ///
    /// Ties in recency fall back to insertion order (stable FIFO among
    /// never-touched entries).
    pub fn cache_frame(&mut self, frame: CachedFrame) {
        if self.disposed {
            return;
        }

        let key = frame.frame_number;
        self.lru.put(key, frame);

        while self.lru.len() > self.options.max_cache_size {
            match self.lru.pop_lru() {
                Some((evicted, _)) => {
                    debug!("Evicted frame {} (cache at {} entries)", evicted, self.lru.len());
                }
                None => break,
            }
        }
    }

    /// Speculatively render frames around `center`, nearest first.
    ///
    /// Fire-and-forget: requests are issued with a no-op callback and never
    /// block or fail the caller. Frames already cached are skipped; frames
    /// with a render in flight keep their current request so the
    /// interactive path is never superseded by speculation.
    pub fn preload(&mut self, center: i32, quality: Quality, renderer: &SharedRenderer) {
        if self.disposed {
            return;
        }

        let mut issued = 0usize;
        for frame_number in preload_order(center, self.options.cache_radius) {
            if self.lru.contains(&frame_number) {
                continue;
            }
            if self.in_flight.contains_key(&frame_number) {
                continue;
            }
            self.get_frame(frame_number, quality, renderer, Box::new(|_| {}));
            issued += 1;
        }

        if issued > 0 {
            debug!("Preload: issued {} requests around frame {}", issued, center);
        }
    }

    /// Schedule a debounced `get_frame`. Only the most recent call within
    /// the quiet window executes; earlier scheduled calls are discarded.
    pub fn debounced_update(
        &mut self,
        frame_number: i32,
        quality: Quality,
        renderer: &SharedRenderer,
        deliver: FrameCallback,
    ) {
        if self.disposed {
            deliver(None);
            return;
        }
        let now = self.clock.now();
        self.debounce
            .schedule(frame_number, quality, Arc::clone(renderer), deliver, now);
    }

    /// Pump the engine: apply completed renders, expire requests past their
    /// deadline, fire a due debounced update. Call from the interactive
    /// loop (every scheduler callback).
    pub fn tick(&mut self) {
        if self.disposed {
            return;
        }

        self.pump();

        let now = self.clock.now();
        self.expire_timeouts(now);

        if let Some(update) = self.debounce.take_due(now) {
            self.get_frame(
                update.frame_number,
                update.quality,
                &update.renderer,
                update.deliver,
            );
        }
    }

    fn pump(&mut self) {
        while let Ok(result) = self.results_rx.try_recv() {
            self.accept(result);
        }
    }

    /// Apply one worker result. The generation check and the cache write
    /// happen back to back on the coordinator, so a stale result can never
    /// overwrite a newer entry.
    fn accept(&mut self, result: RenderResult) {
        let current = self.in_flight.get(&result.frame_number).map(|e| e.generation);
        if current != Some(result.generation) {
            debug!(
                "Discarding stale result for frame {} (generation {})",
                result.frame_number, result.generation
            );
            return;
        }

        let Some(entry) = self.in_flight.remove(&result.frame_number) else {
            return;
        };

        match result.outcome {
            Ok(Some(raster)) => {
                let cached = CachedFrame::new(
                    result.frame_number,
                    Some(raster.clone()),
                    result.quality,
                    self.clock.now(),
                    result.render_time,
                );
                self.cache_frame(cached);
                if let Some(deliver) = entry.deliver {
                    deliver(Some(raster));
                }
            }
            Ok(None) => {
                debug!("Render for frame {} resolved absent", result.frame_number);
                if let Some(deliver) = entry.deliver {
                    deliver(None);
                }
            }
            Err(err) => {
                warn!("Render failed for frame {}: {}", result.frame_number, err);
                self.stats.record_failure();
                if let Some(deliver) = entry.deliver {
                    deliver(None);
                }
            }
        }
    }

    /// Resolve every request past its deadline to absent and best-effort
    /// cancel the underlying render. A late result is still generation-
    /// checked, so it can never repopulate the cache for this request.
    fn expire_timeouts(&mut self, now: Instant) {
        let expired: Vec<i32> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| now >= entry.deadline)
            .map(|(frame, _)| *frame)
            .collect();

        for frame_number in expired {
            let stale = self.next_generation();
            if let Some(entry) = self.in_flight.remove(&frame_number) {
                entry.live.store(stale, Ordering::Relaxed);
                self.stats.record_timeout();
                warn!(
                    "Render for frame {} timed out after {}ms",
                    frame_number, self.options.render_timeout_ms
                );
                if let Some(deliver) = entry.deliver {
                    deliver(None);
                }
            }
        }
    }

    /// Drop cached entries in `[start..=end]`. In-flight renders keep
    /// running; a render completing afterwards may re-populate the cache
    /// with fresh data.
    pub fn invalidate_range(&mut self, start: i32, end: i32) {
        let keys: Vec<i32> = self
            .lru
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| *key >= start && *key <= end)
            .collect();

        let count = keys.len();
        for key in keys {
            self.lru.pop(&key);
        }

        if count > 0 {
            debug!("Invalidated {} frames in [{}..{}]", count, start, end);
        }
    }

    /// Drop every cached entry. In-flight renders keep running.
    pub fn invalidate_all(&mut self) {
        let count = self.lru.len();
        self.lru.clear();
        debug!("Invalidated all {} cached frames", count);
    }

    /// Cancel every in-flight render, discard timers, clear the store.
    /// The only path that forcibly cancels running work.
    pub fn clear(&mut self) {
        let drained: Vec<InFlight> = self.in_flight.drain().map(|(_, entry)| entry).collect();
        let cancelled = drained.len();
        for entry in drained {
            let stale = self.next_generation();
            entry.live.store(stale, Ordering::Relaxed);
            self.stats.record_abort();
            if let Some(deliver) = entry.deliver {
                deliver(None);
            }
        }

        self.debounce.cancel();
        self.lru.clear();

        // Queued results are stale by construction now; drop them
        while self.results_rx.try_recv().is_ok() {}

        debug!("Cache cleared ({} in-flight renders cancelled)", cancelled);
    }

    /// Terminal teardown: clear everything and refuse further work.
    /// Worker threads are joined when the cache is dropped.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.clear();
        self.disposed = true;
        info!("FrameCache disposed");
    }

    /// Snapshot of size, budget and timing stats. Pure read.
    pub fn stats(&self) -> CacheStatsSnapshot {
        let size = self.lru.len();
        let mut total_ms = 0.0f64;
        let mut resident_bytes = 0usize;
        for (_, entry) in self.lru.iter() {
            total_ms += entry.render_time.as_secs_f64() * 1000.0;
            resident_bytes += entry.mem();
        }
        let avg_render_time_ms = if size == 0 { 0.0 } else { total_ms / size as f64 };

        CacheStatsSnapshot {
            size,
            max_size: self.options.max_cache_size,
            avg_render_time_ms,
            resident_bytes,
            in_flight: self.in_flight.len(),
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            aborts: self.stats.aborts.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats.hit_rate()
    }

    fn next_generation(&mut self) -> u64 {
        self.generations += 1;
        self.generations
    }
}

impl Drop for FrameCache {
    fn drop(&mut self) {
        if !self.disposed {
            self.dispose();
        }
    }
}

/// Spiral order around the playhead: center, center+1, center-1, center+2,
/// center-2, ... clamped at frame 0.
fn preload_order(center: i32, radius: i32) -> Vec<i32> {
    let mut order = Vec::with_capacity(radius.max(0) as usize * 2 + 1);
    if center >= 0 {
        order.push(center);
    }
    for offset in 1..=radius.max(0) {
        let forward = center + offset;
        if forward >= 0 {
            order.push(forward);
        }
        let backward = center - offset;
        if backward >= 0 {
            order.push(backward);
        }
    }
    order
}
