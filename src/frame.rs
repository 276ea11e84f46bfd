//! Frame data types: rasters, quality levels, cached entries
//!
//! **Why**: The cache trades render cost against fidelity. A two-level
//! quality ordering (low < high) lets playback run on cheap half-resolution
//! frames while a paused playhead gets full-resolution renders.
//!
//! **Used by**: FrameCache (entries), RenderFrame implementations (output),
//! PlaybackDriver (presentation)

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Render quality level.
///
/// Ordered: `Low < High`. A cached `High` frame satisfies a `Low` request;
/// a cached `Low` frame never satisfies a `High` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quality {
    /// Scaled-down render for live playback (cheap, low latency)
    Low,
    /// Full-resolution render for a parked playhead
    High,
}

impl Quality {
    /// Resolution scale factor for this quality level.
    ///
    /// `low_quality_scale` comes from `FrameCacheOptions` (default 0.5).
    pub fn scale(self, low_quality_scale: f32) -> f32 {
        match self {
            Quality::Low => low_quality_scale,
            Quality::High => 1.0,
        }
    }
}

/// Immutable RGBA8 raster produced by a render function.
///
/// Pixels live behind an `Arc` so clones are cheap (the cache, the
/// presentation path and test assertions all clone frames freely).
#[derive(Debug, Clone)]
pub struct RasterFrame {
    width: usize,
    height: usize,
    pixels: Arc<[u8]>,
}

impl RasterFrame {
    /// Wrap an RGBA8 buffer. Buffer length must be `width * height * 4`.
    pub fn from_rgba8(pixels: Vec<u8>, width: usize, height: usize) -> Self {
        debug_assert_eq!(pixels.len(), width * height * 4);
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }

    /// Solid-color raster (useful for tests and placeholders).
    pub fn solid(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let mut pixels = vec![0u8; width * height * 4];
        for px in pixels.chunks_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Self::from_rgba8(pixels, width, height)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Resolution as tuple
    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Memory size in bytes
    pub fn mem(&self) -> usize {
        self.pixels.len()
    }
}

/// A resolved frame as stored by the cache.
///
/// `image` is absent when the render produced no raster (the entry is still
/// a valid record of the attempt's timing for diagnostics).
#[derive(Debug, Clone)]
pub struct CachedFrame {
    pub frame_number: i32,
    pub image: Option<RasterFrame>,
    pub quality: Quality,
    /// When the entry was cached
    pub timestamp: Instant,
    /// How long the render took
    pub render_time: Duration,
}

impl CachedFrame {
    pub fn new(
        frame_number: i32,
        image: Option<RasterFrame>,
        quality: Quality,
        timestamp: Instant,
        render_time: Duration,
    ) -> Self {
        Self {
            frame_number,
            image,
            quality,
            timestamp,
            render_time,
        }
    }

    /// Resident memory in bytes (raster only, metadata is negligible)
    pub fn mem(&self) -> usize {
        self.image.as_ref().map(RasterFrame::mem).unwrap_or(0)
    }
}
