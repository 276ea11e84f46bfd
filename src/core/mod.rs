//! Core engine modules - cache, render, playback, workers
//!
//! These modules form the caching and playback engine, independent of any
//! presentation layer.

pub mod clock;
pub mod debounce;
pub mod frame_cache;
pub mod player;
pub mod render;
pub mod workers;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use debounce::Debouncer;
pub use frame_cache::{CacheStatsSnapshot, FrameCache, FrameCacheOptions};
pub use player::{PlayState, PlaybackDriver, PlaybackOptions, TimelineSnapshot};
pub use render::{
    CancelToken, FrameCallback, ProceduralRenderer, RenderError, RenderFrame, SharedRenderer,
};
pub use workers::Workers;
