//! Render function contract and cancellation tokens
//!
//! **Why**: The cache must not know how pixels are produced. Renderers plug
//! in behind a single trait: (frame number, quality, cancel token) ->
//! raster-or-absent. Cancellation is a per-frame generation counter, not an
//! abort-object hierarchy: a token is stale the moment the live counter no
//! longer matches the generation it captured.
//!
//! # Renderer obligations
//!
//! - Check the token at entry, after any expensive stage, and immediately
//!   before returning; on cancellation return `Ok(None)` promptly instead
//!   of raising, so the cache's control flow stays uniform.
//! - Scale output dimensions by the configured low-quality factor when
//!   `quality == Low`, and by 1.0 when `High`.
//!
//! **Used by**: FrameCache (render dispatch), worker pool (job bodies)

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::frame::{Quality, RasterFrame};

/// Render failure taxonomy.
///
/// All variants are absorbed at the cache boundary into an absent result;
/// they never propagate to the playback driver or presentation sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// Render exceeded the configured timeout
    #[error("render timed out")]
    Timeout,
    /// Request superseded by a newer one, or the cache was disposed
    #[error("render aborted")]
    Aborted,
    /// Render function failed for a non-cancellation reason
    #[error("render failed: {0}")]
    Failed(String),
}

/// Per-request cancellation token.
///
/// `live` is shared with the cache's in-flight registry; the cache bumps it
/// when the request is superseded, timed out or torn down. Cancelling an
/// already-stale token is inherently a no-op.
#[derive(Debug, Clone)]
pub struct CancelToken {
    live: Arc<AtomicU64>,
    generation: u64,
}

impl CancelToken {
    pub fn new(live: Arc<AtomicU64>, generation: u64) -> Self {
        Self { live, generation }
    }

    /// Token that is never cancelled (for direct renderer invocation)
    pub fn detached() -> Self {
        Self {
            live: Arc::new(AtomicU64::new(0)),
            generation: 0,
        }
    }

    /// True once the owning request has been superseded or torn down.
    pub fn is_cancelled(&self) -> bool {
        self.live.load(Ordering::Relaxed) != self.generation
    }

    /// Generation captured at request start
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Pluggable render function.
///
/// `Ok(Some(raster))` is a completed render, `Ok(None)` a prompt
/// cancellation/absent outcome, `Err` a genuine failure.
pub trait RenderFrame: Send + Sync {
    fn render(
        &self,
        frame_number: i32,
        quality: Quality,
        cancel: &CancelToken,
    ) -> Result<Option<RasterFrame>, RenderError>;
}

/// Shared renderer handle, cloned into worker jobs.
pub type SharedRenderer = Arc<dyn RenderFrame>;

/// Completion callback: invoked exactly once with the resolved raster, or
/// `None` on timeout / abort / failure.
pub type FrameCallback = Box<dyn FnOnce(Option<RasterFrame>) + Send>;

/// Default renderer: procedural test-pattern frames.
///
/// Produces a horizontal gradient whose hue drifts with the frame number,
/// so adjacent frames are visually distinct during scrubbing. Cheap enough
/// to run in tests and the demo binary without media on disk.
#[derive(Debug, Clone)]
pub struct ProceduralRenderer {
    width: usize,
    height: usize,
    low_quality_scale: f32,
}

impl ProceduralRenderer {
    pub fn new(width: usize, height: usize, low_quality_scale: f32) -> Self {
        Self {
            width,
            height,
            low_quality_scale: low_quality_scale.clamp(0.05, 1.0),
        }
    }
}

impl RenderFrame for ProceduralRenderer {
    fn render(
        &self,
        frame_number: i32,
        quality: Quality,
        cancel: &CancelToken,
    ) -> Result<Option<RasterFrame>, RenderError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let scale = quality.scale(self.low_quality_scale);
        let width = ((self.width as f32 * scale) as usize).max(1);
        let height = ((self.height as f32 * scale) as usize).max(1);

        let mut pixels = vec![0u8; width * height * 4];
        let base = (frame_number.rem_euclid(256)) as u8;

        for (y, row) in pixels.chunks_mut(width * 4).enumerate() {
            // Long renders stay responsive to supersede/timeout
            if y % 64 == 0 && cancel.is_cancelled() {
                return Ok(None);
            }
            for (x, px) in row.chunks_mut(4).enumerate() {
                let ramp = (x * 255 / width.max(1)) as u8;
                px[0] = base.wrapping_add(ramp);
                px[1] = base;
                px[2] = (y * 255 / height.max(1)) as u8;
                px[3] = 255;
            }
        }

        if cancel.is_cancelled() {
            return Ok(None);
        }

        Ok(Some(RasterFrame::from_rgba8(pixels, width, height)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_scales_output() {
        let renderer = ProceduralRenderer::new(320, 180, 0.5);
        let token = CancelToken::detached();

        let low = renderer.render(0, Quality::Low, &token).unwrap().unwrap();
        let high = renderer.render(0, Quality::High, &token).unwrap().unwrap();

        assert_eq!(high.resolution(), (320, 180));
        assert_eq!(low.resolution(), (160, 90));
    }

    /// Test: stale token short-circuits to absent
    /// Validates: cancellation returns Ok(None), never an error
    #[test]
    fn test_cancelled_render_is_absent() {
        let live = Arc::new(AtomicU64::new(1));
        let stale = CancelToken::new(Arc::clone(&live), 0);
        assert!(stale.is_cancelled());

        let renderer = ProceduralRenderer::new(64, 64, 0.5);
        let out = renderer.render(3, Quality::High, &stale).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_token_matches_live_generation() {
        let live = Arc::new(AtomicU64::new(5));
        let token = CancelToken::new(Arc::clone(&live), 5);
        assert!(!token.is_cancelled());

        live.store(6, Ordering::Relaxed);
        assert!(token.is_cancelled());
        // Idempotent: checking again changes nothing
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_frames_are_distinct() {
        let renderer = ProceduralRenderer::new(32, 32, 0.5);
        let token = CancelToken::detached();
        let a = renderer.render(1, Quality::High, &token).unwrap().unwrap();
        let b = renderer.render(2, Quality::High, &token).unwrap().unwrap();
        assert_ne!(a.pixels(), b.pixels());
    }
}
