//! PLAYHEAD - Frame cache and adaptive-quality playback engine
//!
//! Keeps an interactive timeline responsive while frames render on
//! background threads: an LRU frame cache with generation-counted
//! cancellation, debounced scrubbing, spiral preload around an idle
//! playhead, and a drift-free playback driver that trades quality for
//! latency while the playhead is moving.
//!
//! The engine is presentation-agnostic: callers supply a [`RenderFrame`]
//! implementation and consume resolved [`RasterFrame`]s from the driver.

// Core engine (cache, render, playback, workers)
pub mod core;

// Frame data model
pub mod frame;

// Re-export commonly used types from core
pub use core::clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use core::frame_cache::{CacheStatsSnapshot, FrameCache, FrameCacheOptions};
pub use core::player::{PlayState, PlaybackDriver, PlaybackOptions, TimelineSnapshot};
pub use core::render::{CancelToken, ProceduralRenderer, RenderError, RenderFrame, SharedRenderer};

// Re-export the frame data model
pub use frame::{CachedFrame, Quality, RasterFrame};
