mod poll_stats;
mod settings;

use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use framegrab_core::capture::capture_worker::CaptureWorker;
use framegrab_core::capture::domain::capture_event::CaptureEvent;
use framegrab_core::shared::frame::Frame;
use framegrab_core::shared::resolution::Resolution;
use framegrab_core::video::infrastructure::ffmpeg_source::FfmpegSource;

use poll_stats::PollStats;

/// How long to wait for the capture thread to release the source on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Polls the most recent frame from a video file, stream URL, or device.
#[derive(Parser)]
#[command(name = "framegrab")]
struct Cli {
    /// Video source: file path, stream URL, or device (overrides --config).
    source: Option<String>,

    /// Target frame size as WIDTHxHEIGHT.
    #[arg(long)]
    size: Option<Resolution>,

    /// JSON capture config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Milliseconds between consumer polls.
    #[arg(long, default_value = "33")]
    poll_ms: u64,

    /// Stop after this many seconds (0 = until the source ends).
    #[arg(long, default_value = "10")]
    duration_secs: u64,

    /// Pause acquisition this many seconds after start.
    #[arg(long)]
    pause_after_secs: Option<u64>,

    /// How long to stay paused.
    #[arg(long, default_value = "1")]
    pause_secs: u64,

    /// Save the last frame read to this image file.
    #[arg(long)]
    save_last: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let config = settings::resolve(cli.config.as_deref(), cli.source.as_deref(), cli.size)?;
    log::info!(
        "Capturing {} at {}",
        config.source_id(),
        config.resolution()
    );

    let mut worker = CaptureWorker::new(Box::new(FfmpegSource::new()), config);
    let events = worker.events();
    worker.start()?;

    let poll_interval = Duration::from_millis(cli.poll_ms);
    let deadline = (cli.duration_secs > 0).then(|| Duration::from_secs(cli.duration_secs));
    let pause_window = cli.pause_after_secs.map(|after| {
        let start = Duration::from_secs(after);
        (start, start + Duration::from_secs(cli.pause_secs))
    });

    let started = Instant::now();
    let mut stats = PollStats::new(Duration::from_secs(1));
    let mut last_frame: Option<Frame> = None;
    let mut failure = None;

    while !worker.state().is_stopped() {
        let elapsed = started.elapsed();
        if deadline.is_some_and(|d| elapsed >= d) {
            break;
        }

        if let Some((pause_at, resume_at)) = pause_window {
            if elapsed >= pause_at && elapsed < resume_at {
                worker.pause();
            } else if elapsed >= resume_at {
                worker.resume();
            }
        }

        let frame = worker.read();
        stats.record(frame.is_some());
        if frame.is_some() {
            last_frame = frame;
        }

        for event in events.try_iter() {
            if let Some(err) = log_event(event) {
                failure.get_or_insert(err);
            }
        }

        if stats.report_due() {
            log::info!(
                "[{}] {}",
                worker.state(),
                stats.summary_string(worker.frames_captured(), worker.frames_dropped())
            );
        }

        thread::sleep(poll_interval);
    }

    if worker.state().is_stopped() {
        // The loop already exited on its own; only the final events remain.
        worker.join();
        for event in events.try_iter() {
            if let Some(err) = log_event(event) {
                failure.get_or_insert(err);
            }
        }
    } else {
        worker.stop();
        wait_for_close(&events, &mut failure);
    }

    log::info!(
        "Summary: {}",
        stats.summary_string(worker.frames_captured(), worker.frames_dropped())
    );

    if let (Some(path), Some(frame)) = (&cli.save_last, &last_frame) {
        save_frame(frame, path)?;
        log::info!("Saved last frame to {}", path.display());
    }

    match failure {
        Some(reason) => Err(reason.into()),
        None => Ok(()),
    }
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.poll_ms == 0 {
        return Err("Poll interval must be at least 1 ms".into());
    }
    if cli.pause_after_secs.is_some() && cli.pause_secs == 0 {
        return Err("--pause-secs must be positive when --pause-after-secs is set".into());
    }
    if let Some(path) = &cli.save_last {
        if image::ImageFormat::from_path(path).is_err() {
            return Err(format!("Unsupported image format: {}", path.display()).into());
        }
    }
    Ok(())
}

/// Logs a capture event; returns the failure message for fatal events.
fn log_event(event: CaptureEvent) -> Option<String> {
    match event {
        CaptureEvent::Ready { source_id } => {
            log::info!("Source ready: {source_id}");
            None
        }
        CaptureEvent::Failed(err) => {
            log::error!("{err}");
            Some(err.to_string())
        }
        CaptureEvent::Closed { source_id } => {
            log::info!("Source closed: {source_id}");
            None
        }
    }
}

/// Drains events until the source is closed or the grace period ends.
///
/// A source blocked inside a grab may never observe the stop; the process
/// exits regardless.
fn wait_for_close(
    events: &crossbeam_channel::Receiver<CaptureEvent>,
    failure: &mut Option<String>,
) {
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Ok(event) = events.recv_timeout(remaining) else {
            log::warn!("Capture thread did not close the source in time");
            return;
        };
        let closed = matches!(event, CaptureEvent::Closed { .. });
        if let Some(err) = log_event(event) {
            failure.get_or_insert(err);
        }
        if closed {
            return;
        }
    }
}

fn save_frame(frame: &Frame, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let color = match frame.channels() {
        1 => image::ColorType::L8,
        3 => image::ColorType::Rgb8,
        4 => image::ColorType::Rgba8,
        other => return Err(format!("Cannot save a {other}-channel frame").into()),
    };
    image::save_buffer(path, frame.data(), frame.width(), frame.height(), color)?;
    Ok(())
}
