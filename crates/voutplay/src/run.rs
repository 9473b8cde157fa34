use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use image::RgbaImage;
use tracing_subscriber::EnvFilter;
use vout::{BackendOptions, DisplayBackend, GlContext, PictureLease, PicturePool, VideoFormat};
use vout_wgpu::WgpuContext;
use voutconfig::PlayerConfig;

use crate::cli::Cli;
use crate::frames::{write_frame, FrameSource};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Reads `--config` (if any) and applies the command-line overrides on top.
pub fn resolve_config(cli: &Cli) -> Result<PlayerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file at {}", path.display()))?;
            PlayerConfig::from_toml_str(&contents)
                .with_context(|| format!("failed to load config file at {}", path.display()))?
        }
        None => PlayerConfig::default(),
    };

    if let Some((width, height)) = cli.size {
        config.source.width = width;
        config.source.height = height;
    }
    if let Some(crop) = cli.crop {
        config.source.crop = Some(crop);
    }
    if let Some(pattern) = cli.pattern {
        config.source.pattern = Some(pattern);
        config.source.image = None;
    }
    if let Some(image) = &cli.image {
        config.source.image = Some(image.clone());
        config.source.pattern = None;
    }
    if let Some(profile) = cli.profile {
        config.backend.profile = Some(profile);
    }
    if let Some(path) = &cli.fragment_program {
        config.backend.fragment_program = Some(path.clone());
    }
    if let Some(frames) = cli.frames {
        config.playback.frames = Some(frames);
    }
    if let Some(fps) = cli.fps {
        config.playback.fps = Some(fps);
    }

    config.validate()?;
    Ok(config)
}

pub fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    let requested = config.requested_format();
    let options = backend_options(&config)?;

    let context = Arc::new(WgpuContext::headless(
        requested.visible_width,
        requested.visible_height,
    )?);
    tracing::info!(
        adapter = context.adapter_name(),
        size = ?context.size(),
        "headless context created"
    );

    let mut format = requested;
    let shared: Arc<dyn GlContext> = context.clone();
    let mut backend = DisplayBackend::new(shared, &mut format, options)
        .context("failed to create display backend")?;

    if cli.print_format {
        print_format(&requested, &backend);
        return Ok(());
    }

    let pool = backend.pool().context("failed to create picture pool")?;
    let source = FrameSource::load(
        config.source.image.as_deref(),
        config.source.pattern,
        format.width,
        format.height,
    )?;
    let limit = config.frame_limit();
    tracing::info!(
        frames = limit,
        pictures = pool.len(),
        source = %source.describe(),
        chroma = %format.chroma,
        "starting playback"
    );

    let presented = play(
        &mut backend,
        pool,
        source,
        format,
        limit,
        config.frame_interval(),
    )?;

    if let Some(path) = &cli.export {
        export_png(&context, path)?;
    }

    drop(backend);
    tracing::info!(presented, "playback finished");
    Ok(())
}

fn backend_options(config: &PlayerConfig) -> Result<BackendOptions> {
    let fragment_program = match &config.backend.fragment_program {
        Some(path) => Some(fs::read_to_string(path).with_context(|| {
            format!("failed to read fragment program at {}", path.display())
        })?),
        None => None,
    };
    Ok(BackendOptions {
        profile: config.backend.profile,
        fragment_program,
        storage_hint: config.backend.storage_hint,
    })
}

fn print_format(requested: &VideoFormat, backend: &DisplayBackend) {
    let format = backend.format();
    let layout = backend.layout();
    println!("requested:   {} {}x{}", requested.chroma, requested.width, requested.height);
    println!("negotiated:  {} {}x{}", format.chroma, format.width, format.height);
    println!(
        "visible:     {}x{}+{}+{}",
        format.visible_width, format.visible_height, format.x_offset, format.y_offset
    );
    println!(
        "masks:       r={:#010x} g={:#010x} b={:#010x}",
        format.rmask, format.gmask, format.bmask
    );
    println!("profile:     {}", layout.profile);
    println!(
        "texture:     {}x{} target={:#06x} format={:#06x} type={:#06x} units={}",
        layout.width, layout.height, layout.target, layout.format, layout.ty, layout.units
    );
    println!("program:     {}", backend.program_id());
}

/// Runs the producer thread and presents every frame it sends.
fn play(
    backend: &mut DisplayBackend,
    pool: PicturePool,
    source: FrameSource,
    format: VideoFormat,
    limit: u64,
    interval: Option<Duration>,
) -> Result<u64> {
    let (frame_tx, frame_rx) = bounded::<(u64, PictureLease)>(pool.len().max(1));
    let (recycle_tx, recycle_rx) = bounded::<()>(pool.len().max(1));

    let producer = thread::Builder::new()
        .name("voutplay-producer".into())
        .spawn(move || produce(pool, source, format, limit, frame_tx, recycle_rx))
        .map_err(|err| anyhow!("failed to spawn producer thread: {err}"))?;

    let mut presented = 0u64;
    let mut stats = RenderStats::new();
    let result = present(
        backend,
        &format,
        interval,
        &frame_rx,
        &recycle_tx,
        &mut presented,
        &mut stats,
    );

    // Unblocks a producer stuck on a full channel when presenting failed.
    drop(frame_rx);
    drop(recycle_tx);
    let produced = producer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))?;

    result?;
    produced?;
    Ok(presented)
}

fn present(
    backend: &mut DisplayBackend,
    format: &VideoFormat,
    interval: Option<Duration>,
    frames: &Receiver<(u64, PictureLease)>,
    recycle: &Sender<()>,
    presented: &mut u64,
    stats: &mut RenderStats,
) -> Result<()> {
    for (index, lease) in frames.iter() {
        let started = Instant::now();
        backend
            .prepare(&lease)
            .with_context(|| format!("failed to stage frame {index}"))?;
        backend
            .display(format)
            .with_context(|| format!("failed to display frame {index}"))?;
        drop(lease);
        let _ = recycle.try_send(());

        *presented += 1;
        stats.record(started.elapsed());

        if let Some(interval) = interval {
            let elapsed = started.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
    }
    stats.finish();
    Ok(())
}

fn produce(
    pool: PicturePool,
    source: FrameSource,
    format: VideoFormat,
    limit: u64,
    frames: Sender<(u64, PictureLease)>,
    recycle: Receiver<()>,
) -> Result<()> {
    let rgba_width = format.width;
    let rgba_height = format.height;
    for index in 0..limit {
        let lease = loop {
            if let Some(lease) = pool.acquire() {
                break lease;
            }
            // Every picture is queued or on screen; wait for one to come back.
            if recycle.recv().is_err() {
                return Ok(());
            }
        };

        let rgba = source.render(index, rgba_width, rgba_height);
        {
            let mut pixels = lease.pixels();
            write_frame(&rgba, lease.format(), lease.plane(), &mut pixels)?;
        }

        if frames.send((index, lease)).is_err() {
            tracing::debug!(index, "renderer stopped; producer exiting");
            return Ok(());
        }
    }
    Ok(())
}

fn export_png(context: &WgpuContext, path: &Path) -> Result<()> {
    let frame = context.read_rgba()?;
    let image = RgbaImage::from_raw(frame.width, frame.height, frame.pixels)
        .ok_or_else(|| anyhow!("read-back buffer does not match {}x{}", frame.width, frame.height))?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write PNG to {}", path.display()))?;
    tracing::info!(path = %path.display(), "exported last frame");
    Ok(())
}

/// Per-second presentation counters.
struct RenderStats {
    window_start: Instant,
    frames: u32,
    busy: Duration,
    total_frames: u64,
    total_busy: Duration,
}

impl RenderStats {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            busy: Duration::ZERO,
            total_frames: 0,
            total_busy: Duration::ZERO,
        }
    }

    fn record(&mut self, frame_time: Duration) {
        self.frames += 1;
        self.busy += frame_time;
        self.total_frames += 1;
        self.total_busy += frame_time;

        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            tracing::debug!(
                fps = f64::from(self.frames) / elapsed.as_secs_f64(),
                avg_ms = self.busy.as_secs_f64() * 1000.0 / f64::from(self.frames),
                "render stats"
            );
            self.window_start = Instant::now();
            self.frames = 0;
            self.busy = Duration::ZERO;
        }
    }

    fn finish(&self) {
        if self.total_frames == 0 {
            return;
        }
        tracing::info!(
            frames = self.total_frames,
            avg_ms = self.total_busy.as_secs_f64() * 1000.0 / self.total_frames as f64,
            "presentation summary"
        );
    }
}
