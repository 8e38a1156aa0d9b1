// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - Recording a watermarked clip from a camera or the test pattern
//! - Listing H.264 encoders
//! - Printing or writing the effective configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;
use watercam::backends::SnapshotWindow;
use watercam::backends::camera::{FrameSize, GstFrameSource, SensorRotation, SourceKind};
use watercam::config::Config;
use watercam::media::GstEncoderBackend;
use watercam::media::encoders::{
    enumerate_h264_encoders, log_available_encoders, missing_required_elements,
};
use watercam::pipelines::{
    CompositorOptions, CompositorPipeline, RecorderEvent, SystemClock, WatermarkAnimation,
};
use watercam::storage;

/// How long to wait for the camera to come up
const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the recording to be finalized after stopping
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);

/// Refresh interval of the progress line
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Camera to record from
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceArg {
    V4l2,
    Pipewire,
    Test,
}

/// Watermark animation override
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AnimationArg {
    Pulse,
    Blink,
}

/// Options of the `record` command
#[derive(Debug, Clone, clap::Args)]
pub struct RecordArgs {
    /// Frame source
    #[arg(short, long, value_enum, default_value = "test")]
    pub source: SourceArg,

    /// V4L2 device node (e.g. /dev/video0)
    #[arg(long)]
    pub device: Option<String>,

    /// Capture width
    #[arg(long, default_value = "1280")]
    pub width: u32,

    /// Capture height
    #[arg(long, default_value = "720")]
    pub height: u32,

    /// Capture frame rate; the source default when unset
    #[arg(long)]
    pub framerate: Option<u32>,

    /// Sensor mounting rotation in degrees (0, 90, 180, 270)
    #[arg(long, default_value = "0")]
    pub rotation: i32,

    /// Recording duration in seconds
    #[arg(short, long, default_value = "10")]
    pub duration: u64,

    /// Output file or directory (default: ~/Videos/watercam/video_TIMESTAMP.mp4)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Watermark PNG (default: built-in mark)
    #[arg(short, long)]
    pub watermark: Option<PathBuf>,

    /// Record without the watermark
    #[arg(long)]
    pub no_watermark: bool,

    /// Watermark animation, overriding the configuration
    #[arg(long, value_enum)]
    pub animation: Option<AnimationArg>,

    /// Write the last preview frame to this PNG
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

impl RecordArgs {
    fn source_kind(&self) -> SourceKind {
        match self.source {
            SourceArg::V4l2 => SourceKind::V4l2 {
                device: self.device.clone(),
            },
            SourceArg::Pipewire => SourceKind::PipeWire,
            SourceArg::Test => SourceKind::TestPattern,
        }
    }

    /// Fold command line overrides into the configuration
    fn apply_to(&self, config: &mut Config) {
        if self.no_watermark {
            config.watermark.enabled = false;
        }
        if let Some(path) = &self.watermark {
            config.watermark.image = Some(path.clone());
        }
        match self.animation {
            Some(AnimationArg::Pulse) => config.watermark.animation = WatermarkAnimation::pulse(),
            Some(AnimationArg::Blink) => config.watermark.animation = WatermarkAnimation::blink(),
            None => {}
        }
    }
}

/// Record a watermarked clip
pub fn record(args: RecordArgs, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;
    log_available_encoders();

    let missing = missing_required_elements();
    if !missing.is_empty() {
        return Err(format!("Missing GStreamer elements: {}", missing.join(", ")).into());
    }

    let mut config = Config::load(config_path)?;
    args.apply_to(&mut config);

    let output_path =
        storage::prepare_output_path(args.output.clone(), config.recording.output_dir.as_deref())?;
    let watermark = match &config.watermark.image {
        Some(path) => storage::load_watermark(path)?,
        None => storage::builtin_watermark(),
    };

    let runtime = event_runtime()?;
    let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let mut options = CompositorOptions::new(
        watermark,
        Arc::new(GstEncoderBackend),
        output_path.clone(),
        Arc::new(SystemClock::new()),
        events_tx,
    );
    options.watermark_enabled = config.watermark.enabled;
    options.animation = config.watermark.animation;
    options.encoder = config.encoder.settings(0, 0);
    options.min_duration_ms = config.recording.min_duration_ms;

    let pipeline = CompositorPipeline::with_wgpu(options)?;

    let source_kind = args.source_kind();
    println!("Source: {} ({}x{})", source_kind, args.width, args.height);
    let source = GstFrameSource::new(
        source_kind,
        FrameSize::new(args.width, args.height),
        args.framerate,
        SensorRotation::from_degrees(args.rotation),
    );

    let preview = Arc::new(SnapshotWindow::new(FrameSize::default()));
    let bounds = FrameSize::new(config.preview.max_width, config.preview.max_height);
    let sizing_window = Arc::clone(&preview);
    pipeline.bind_camera(Box::new(source), preview.clone(), move |frame_size| {
        let view = frame_size.fit_within(bounds);
        sizing_window.resize(view);
        view
    });

    match wait_for_event(&runtime, &mut events, READY_TIMEOUT, |event| {
        matches!(
            event,
            RecorderEvent::Ready { .. } | RecorderEvent::ConfigurationFailed { .. }
        )
    }) {
        Some(RecorderEvent::Ready {
            frame_size,
            view_size,
        }) => println!("Frame size: {}, preview: {}", frame_size, view_size),
        Some(RecorderEvent::ConfigurationFailed { reason }) => {
            pipeline.destroy();
            return Err(reason.into());
        }
        _ => {
            pipeline.destroy();
            return Err("Camera did not start in time".into());
        }
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    println!("Output: {}", output_path.display());
    println!();
    println!("Recording... (press Ctrl+C to stop early)");
    pipeline.start();

    let start = Instant::now();
    let target = Duration::from_secs(args.duration);
    while start.elapsed() < target {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        let elapsed = start.elapsed().as_secs();
        print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        if let Some(RecorderEvent::RecordingFailed { reason }) =
            wait_for_event(&runtime, &mut events, PROGRESS_INTERVAL, |event| {
                matches!(event, RecorderEvent::RecordingFailed { .. })
            })
        {
            println!();
            pipeline.destroy();
            return Err(reason.into());
        }
    }
    println!();

    pipeline.stop();
    let outcome = wait_for_event(&runtime, &mut events, FINALIZE_TIMEOUT, |event| {
        matches!(
            event,
            RecorderEvent::VideoRecorded { .. }
                | RecorderEvent::RecordingTooShort { .. }
                | RecorderEvent::RecordingFailed { .. }
        )
    });

    if let Some(path) = &args.snapshot {
        match preview.save_png(path)? {
            Some(path) => println!("Preview snapshot: {}", path.display()),
            None => println!("No preview frame to save"),
        }
    }
    pipeline.destroy();

    match outcome {
        Some(RecorderEvent::VideoRecorded { path, duration }) => {
            println!(
                "Video saved: {} ({:.1}s)",
                path.display(),
                duration.as_secs_f64()
            );
            Ok(())
        }
        Some(RecorderEvent::RecordingTooShort { duration }) => Err(format!(
            "Recording too short ({:.1}s), nothing saved",
            duration.as_secs_f64()
        )
        .into()),
        Some(RecorderEvent::RecordingFailed { reason }) => Err(reason.into()),
        _ => Err("Recording was not finalized in time".into()),
    }
}

/// Single-threaded runtime the CLI waits for pipeline events on
fn event_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
}

/// Block until an event matching `wanted` arrives, skipping the others.
///
/// Gives up after `timeout`, or as soon as the pipeline drops its sender.
fn wait_for_event(
    runtime: &Runtime,
    events: &mut UnboundedReceiver<RecorderEvent>,
    timeout: Duration,
    wanted: impl Fn(&RecorderEvent) -> bool,
) -> Option<RecorderEvent> {
    runtime.block_on(async {
        let matching = async {
            while let Some(event) = events.recv().await {
                if wanted(&event) {
                    return Some(event);
                }
            }
            None
        };
        tokio::time::timeout(timeout, matching).await.ok().flatten()
    })
}

/// List available H.264 encoders
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let encoders = enumerate_h264_encoders();
    if encoders.is_empty() {
        println!("No H.264 encoders found.");
    } else {
        println!("Available H.264 encoders (in order of preference):");
        println!();
        for encoder in &encoders {
            let kind = if encoder.is_hardware { "hardware" } else { "software" };
            println!(
                "  {:<14} {} [{}]",
                encoder.element_name, encoder.display_name, kind
            );
        }
    }

    let missing = missing_required_elements();
    if !missing.is_empty() {
        println!();
        println!("Missing required elements: {}", missing.join(", "));
    }
    Ok(())
}

/// Print the effective configuration, optionally writing it to disk
pub fn show_config(config_path: Option<&Path>, write: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(config_path)?;
    println!("{}", config.to_json()?);

    if write {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Config::default_path().ok_or("No config directory")?,
        };
        config.save(&path)?;
        println!("Written to {}", path.display());
    }
    Ok(())
}
