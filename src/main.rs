use playhead::core::clock::SystemClock;
use playhead::core::frame_cache::{FrameCache, FrameCacheOptions};
use playhead::core::player::{PlaybackDriver, PlaybackOptions};
use playhead::core::render::{ProceduralRenderer, SharedRenderer};
use playhead::frame::Quality;

use anyhow::Result;
use clap::Parser;
use log::info;
use std::sync::Arc;
use std::time::Duration;

/// Headless demo: plays a procedural sequence, scrubs the timeline, and
/// dumps cache statistics as JSON.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Content length in frames
    #[arg(long = "frames", value_name = "N", default_value = "120")]
    frames: i32,

    /// Playback rate
    #[arg(long = "fps", value_name = "FPS", default_value = "24.0")]
    fps: f32,

    /// Playback duration in milliseconds
    #[arg(long = "play-ms", value_name = "MS", default_value = "1000")]
    play_ms: u64,

    /// Frame to scrub to after playback
    #[arg(long = "scrub-to", value_name = "FRAME", default_value = "60")]
    scrub_to: i32,

    /// Cache capacity in frames
    #[arg(long = "cache-size", value_name = "N", default_value = "100")]
    cache_size: usize,

    /// Preload radius around an idle playhead
    #[arg(long = "radius", value_name = "N", default_value = "30")]
    radius: i32,

    /// Render resolution, e.g. 640x360
    #[arg(long = "size", value_name = "WxH", default_value = "640x360")]
    size: String,
}

fn parse_size(value: &str) -> Result<(usize, usize)> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| anyhow::anyhow!("invalid size '{value}', expected WxH"))?;
    Ok((w.parse()?, h.parse()?))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let (width, height) = parse_size(&args.size)?;

    let options = FrameCacheOptions {
        cache_radius: args.radius,
        max_cache_size: args.cache_size,
        ..Default::default()
    };
    let low_quality_scale = options.low_quality_scale;

    let clock = Arc::new(SystemClock);
    let mut cache = FrameCache::new(options, clock.clone());
    let renderer: SharedRenderer =
        Arc::new(ProceduralRenderer::new(width, height, low_quality_scale));

    let mut driver = PlaybackDriver::new(
        PlaybackOptions {
            fps: args.fps,
            duration_frames: args.frames,
            ..Default::default()
        },
        clock,
    );

    // Real-time playback at low quality
    info!("Playing {} frames for {} ms", args.frames, args.play_ms);
    driver.play();
    let deadline = std::time::Instant::now() + Duration::from_millis(args.play_ms);
    while std::time::Instant::now() < deadline {
        driver.tick(&mut cache, &renderer);
        std::thread::sleep(Duration::from_millis(4));
    }
    driver.pause();
    info!("Paused at frame {}", driver.position());

    // Debounced scrub to a distant frame, then settle and preload
    driver.scrub_to(args.scrub_to, &mut cache, &renderer);
    let settle = std::time::Instant::now() + Duration::from_millis(500);
    while std::time::Instant::now() < settle {
        driver.tick(&mut cache, &renderer);
        std::thread::sleep(Duration::from_millis(4));
    }

    if let Some(raster) = driver.latest() {
        let (w, h) = raster.resolution();
        info!("Presented frame {} at {}x{}", driver.position(), w, h);
    }
    info!(
        "High-quality frame {} cached: {}",
        args.scrub_to,
        cache.contains(args.scrub_to)
    );

    // One more request exercises the quality upgrade path
    cache.get_frame(driver.position(), Quality::High, &renderer, Box::new(|_| {}));
    while cache.in_flight_count() > 0 {
        cache.tick();
        std::thread::sleep(Duration::from_millis(2));
    }

    println!("{}", serde_json::to_string_pretty(&cache.stats())?);

    cache.dispose();
    Ok(())
}
