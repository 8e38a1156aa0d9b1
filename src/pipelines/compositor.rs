// SPDX-License-Identifier: MPL-2.0

//! Camera and watermark compositor driving the preview and the encoder
//!
//! [`CompositorPipeline`] owns one rendering worker (`watercam-render`). The
//! graphics backend, both render surfaces and the recording session live on that
//! worker and are only ever touched by tasks posted to it. The public methods on the
//! pipeline post work and return immediately; [`wait_idle`](CompositorPipeline::wait_idle)
//! and [`destroy`](CompositorPipeline::destroy) are the only calls that wait.
//!
//! # Lifecycle
//!
//! ```text
//! new() ── Unconfigured ── bind_camera() ──▶ Configured ── start() ──▶ Recording
//!                                             ▲                          │
//!                                             └────────── stop() ────────┘
//! destroy() from any state
//! ```
//!
//! Camera notifications arrive on the source's thread. They never render: they queue
//! at most one frame task, and that task composites whatever frame is latest when it
//! runs.

use super::clock::Clock;
use super::session::{ActiveRecording, RecordingOutcome, RecordingSession};
use super::video::VideoEncoder;
use super::watermark::WatermarkAnimation;
use crate::backends::camera::{
    CameraFrame, FrameHandoff, FrameSize, FrameSource, IDENTITY_TRANSFORM, Mat4,
};
use crate::constants::{recording, timing};
use crate::errors::{self, AppError, AppResult, GraphicsError, GraphicsResult};
use crate::gpu::{GraphicsBackend, NativeWindow, SurfaceId, WgpuBackend};
use crate::media::{EncoderBackend, EncoderSettings};
use crate::worker::{Worker, WorkerExit};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};

/// Name of the rendering thread
pub const RENDER_THREAD_NAME: &str = "watercam-render";

/// Picks the preview size for a natural frame size
type SizingCallback = Box<dyn Fn(FrameSize) -> FrameSize + Send + 'static>;

/// Signals emitted by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// The camera is bound and the preview is running
    Ready {
        frame_size: FrameSize,
        view_size: FrameSize,
    },
    /// Binding the camera failed; the pipeline stays unconfigured
    ConfigurationFailed { reason: String },
    /// A recording session started writing to `path`
    RecordingStarted { path: PathBuf },
    /// A recording was finalized and kept
    VideoRecorded { path: PathBuf, duration: Duration },
    /// A recording was not longer than the minimum and was discarded
    RecordingTooShort { duration: Duration },
    /// A recording could not start or could not be finalized
    RecordingFailed { reason: String },
}

/// Construction parameters of a pipeline
pub struct CompositorOptions {
    /// Watermark bitmap, uploaded once per binding
    pub watermark: image::RgbaImage,
    pub watermark_enabled: bool,
    pub animation: WatermarkAnimation,
    /// Creates the codec and muxer of each recording
    pub encoder_backend: Arc<dyn EncoderBackend>,
    /// Encoder parameters; width and height are replaced by the frame size
    pub encoder: EncoderSettings,
    /// Where recordings are written
    pub output_path: PathBuf,
    pub min_duration_ms: u64,
    pub clock: Arc<dyn Clock>,
    pub events: UnboundedSender<RecorderEvent>,
}

impl CompositorOptions {
    /// Options with default watermark, encoder and duration policy
    pub fn new(
        watermark: image::RgbaImage,
        encoder_backend: Arc<dyn EncoderBackend>,
        output_path: PathBuf,
        clock: Arc<dyn Clock>,
        events: UnboundedSender<RecorderEvent>,
    ) -> Self {
        Self {
            watermark,
            watermark_enabled: true,
            animation: WatermarkAnimation::default(),
            encoder_backend,
            encoder: EncoderSettings::new(0, 0),
            output_path,
            min_duration_ms: recording::MIN_DURATION_MS,
            clock,
            events,
        }
    }
}

/// State shared between the pipeline handle and the camera listener
#[derive(Default)]
struct SharedFlags {
    destroyed: AtomicBool,
    frame_pending: AtomicBool,
}

/// Everything a configured pipeline owns for its camera
struct Binding {
    source: Box<dyn FrameSource>,
    handoff: FrameHandoff,
    preview: SurfaceId,
    frame_size: FrameSize,
    view_size: FrameSize,
    configured_at_ms: u64,
}

/// State owned by the rendering worker
struct RenderState {
    backend: Box<dyn GraphicsBackend>,
    options: CompositorOptions,
    binding: Option<Binding>,
    session: RecordingSession,
    /// Texture transform of the frame being drawn, reused across frames
    transform: Mat4,
    frames_rendered: u64,
}

impl RenderState {
    fn emit(&self, event: RecorderEvent) {
        debug!(?event, "Recorder event");
        if self.options.events.send(event).is_err() {
            trace!("No event receiver");
        }
    }

    fn bind(
        &mut self,
        mut source: Box<dyn FrameSource>,
        window: Arc<dyn NativeWindow>,
        sizing: SizingCallback,
        worker: Weak<Worker<RenderState>>,
        flags: Arc<SharedFlags>,
    ) {
        if self.binding.is_some() {
            info!("Rebinding camera, tearing down the previous configuration");
            self.unbind();
        }

        let info = match source.transformation_info() {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Frame source has no transformation info");
                self.emit(RecorderEvent::ConfigurationFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };
        let frame_size = info.natural_size();
        let view_size = sizing(frame_size);
        info!(
            crop = %info.crop,
            rotation = %info.rotation,
            %frame_size,
            %view_size,
            "Configuring compositor"
        );

        let preview = match self.prepare_preview(window) {
            Ok(preview) => preview,
            Err(e) => errors::fatal("bind_camera", e),
        };

        let handoff = FrameHandoff::new();
        handoff.set_listener(Arc::new(move || {
            if let Some(worker) = worker.upgrade() {
                schedule_frame(&worker, &flags);
            }
        }));

        if let Err(e) = source.start(handoff.clone()) {
            warn!(error = %e, "Failed to start frame source");
            handoff.clear_listener();
            self.backend.release_surface(preview);
            self.emit(RecorderEvent::ConfigurationFailed {
                reason: e.to_string(),
            });
            return;
        }

        self.binding = Some(Binding {
            source,
            handoff,
            preview,
            frame_size,
            view_size,
            configured_at_ms: self.options.clock.now_ms(),
        });
        self.emit(RecorderEvent::Ready {
            frame_size,
            view_size,
        });
    }

    fn prepare_preview(&mut self, window: Arc<dyn NativeWindow>) -> GraphicsResult<SurfaceId> {
        let preview = self.backend.create_surface(window)?;
        self.backend.make_current(preview)?;
        self.backend.prepare_scene(&self.options.watermark)?;
        Ok(preview)
    }

    /// Stop recording, detach from the camera and release the preview surface
    fn unbind(&mut self) {
        self.stop_recording();
        let Some(mut binding) = self.binding.take() else {
            return;
        };
        binding.handoff.clear_listener();
        binding.source.stop();
        self.backend.release_surface(binding.preview);
        debug!(frames = self.frames_rendered, "Camera unbound");
    }

    fn teardown(&mut self) {
        self.unbind();
        self.backend.release();
        info!(frames = self.frames_rendered, "Compositor released");
    }

    fn elapsed_ms(&self, now_ms: u64) -> u64 {
        let origin = match &self.session {
            RecordingSession::Recording(active) => active.started_at_ms(),
            RecordingSession::Idle => self
                .binding
                .as_ref()
                .map_or(now_ms, |binding| binding.configured_at_ms),
        };
        now_ms.saturating_sub(origin)
    }

    fn render_frame(&mut self) {
        let Some(binding) = &self.binding else {
            return;
        };
        let Some(frame) = binding.handoff.take_latest() else {
            trace!("No new frame, skipping");
            return;
        };
        let preview = binding.preview;
        let view_size = binding.view_size;
        let frame_size = binding.frame_size;

        let alpha = self
            .options
            .animation
            .alpha(self.elapsed_ms(self.options.clock.now_ms()));

        if let Err(e) = self.draw_preview(&frame, preview, view_size, alpha) {
            errors::fatal("render preview", e);
        }

        match self.draw_encoder(&frame, frame_size, alpha) {
            Ok(()) => {}
            Err(GraphicsError::Present(reason)) => {
                warn!(%reason, "Encoder surface rejected a frame, stopping recording");
                self.fail_recording(reason);
            }
            Err(e) => errors::fatal("render encoder frame", e),
        }

        self.frames_rendered += 1;
        if self.frames_rendered % 300 == 0 {
            debug!(frames = self.frames_rendered, alpha, "Compositor progress");
        }
    }

    fn draw_preview(
        &mut self,
        frame: &CameraFrame,
        preview: SurfaceId,
        view_size: FrameSize,
        alpha: f32,
    ) -> GraphicsResult<()> {
        self.backend.update_camera_texture(frame)?;
        self.transform.copy_from_slice(&frame.transform);

        self.backend.make_current(preview)?;
        self.backend.set_viewport(view_size);
        self.draw_layers(alpha)?;
        self.backend.swap_buffers(preview)
    }

    fn draw_encoder(
        &mut self,
        frame: &CameraFrame,
        frame_size: FrameSize,
        alpha: f32,
    ) -> GraphicsResult<()> {
        let Some(active) = self.session.active_mut() else {
            return Ok(());
        };
        let surface = active.surface();
        let pts = active.next_presentation_time(frame.timestamp_ns);

        self.backend.make_current(surface)?;
        self.backend.set_viewport(frame_size);
        self.draw_layers(alpha)?;
        if let Some(active) = self.session.active_mut() {
            active.encoder().process();
        }
        self.backend.set_presentation_time(surface, pts)?;
        self.backend.swap_buffers(surface)
    }

    fn draw_layers(&mut self, alpha: f32) -> GraphicsResult<()> {
        self.backend.draw_camera(&self.transform)?;
        if self.options.watermark_enabled {
            self.backend.draw_watermark(alpha)?;
        }
        Ok(())
    }

    fn start_recording(&mut self) {
        let Some(binding) = &self.binding else {
            debug!("Start requested before the camera is bound, ignoring");
            return;
        };
        if self.session.is_recording() {
            debug!("Already recording");
            return;
        }

        let frame_size = binding.frame_size;
        let settings = EncoderSettings {
            width: frame_size.width,
            height: frame_size.height,
            ..self.options.encoder.clone()
        };
        let started_at_ms = self.options.clock.now_ms();
        let path = self.options.output_path.clone();

        let encoder = match VideoEncoder::configure(
            Arc::clone(&self.options.encoder_backend),
            &path,
            settings,
        ) {
            Ok(encoder) => encoder,
            Err(e) => {
                error!(error = %e, "Failed to configure encoder");
                self.emit(RecorderEvent::RecordingFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let surface = match self.backend.create_surface(encoder.input_surface()) {
            Ok(surface) => surface,
            Err(e) => errors::fatal("create encoder surface", e),
        };

        self.session = RecordingSession::Recording(ActiveRecording::new(
            started_at_ms,
            encoder,
            surface,
        ));
        info!(path = %path.display(), %frame_size, "Recording started");
        self.emit(RecorderEvent::RecordingStarted { path });
    }

    /// Leave Recording: the preview becomes current before the encoder surface goes
    fn end_session(&mut self) -> Option<ActiveRecording> {
        let active = self.session.take()?;
        if let Some(binding) = &self.binding
            && let Err(e) = self.backend.make_current(binding.preview)
        {
            warn!(error = %e, "Failed to make preview current");
        }
        self.backend.release_surface(active.surface());
        Some(active)
    }

    fn stop_recording(&mut self) {
        let Some(active) = self.end_session() else {
            return;
        };
        let now_ms = self.options.clock.now_ms();
        match active.finish(now_ms, self.options.min_duration_ms) {
            RecordingOutcome::Recorded {
                path, duration_ms, ..
            } => self.emit(RecorderEvent::VideoRecorded {
                path,
                duration: Duration::from_millis(duration_ms),
            }),
            RecordingOutcome::TooShort { duration_ms } => {
                self.emit(RecorderEvent::RecordingTooShort {
                    duration: Duration::from_millis(duration_ms),
                })
            }
            RecordingOutcome::Failed { reason } => {
                self.emit(RecorderEvent::RecordingFailed { reason })
            }
        }
    }

    fn fail_recording(&mut self, reason: String) {
        let Some(active) = self.end_session() else {
            return;
        };
        active.abandon();
        self.emit(RecorderEvent::RecordingFailed { reason });
    }
}

/// Queue a frame task unless one is already pending
fn schedule_frame(worker: &Worker<RenderState>, flags: &Arc<SharedFlags>) {
    if flags.destroyed.load(Ordering::Acquire) || worker.is_shutdown() {
        return;
    }
    if flags.frame_pending.swap(true, Ordering::AcqRel) {
        return;
    }
    let task_flags = Arc::clone(flags);
    let queued = worker.execute(move |state: &mut RenderState| {
        // Cleared first so a frame arriving mid-render schedules the next pass
        task_flags.frame_pending.store(false, Ordering::Release);
        state.render_frame();
    });
    if !queued {
        flags.frame_pending.store(false, Ordering::Release);
    }
}

/// Compositing pipeline handle
pub struct CompositorPipeline {
    worker: Arc<Worker<RenderState>>,
    flags: Arc<SharedFlags>,
}

impl CompositorPipeline {
    /// Spawn the rendering worker and build the graphics backend on it.
    ///
    /// Fails when the backend cannot be created.
    pub fn new<F, B>(options: CompositorOptions, graphics_factory: F) -> AppResult<Self>
    where
        F: FnOnce() -> GraphicsResult<B> + Send + 'static,
        B: GraphicsBackend + 'static,
    {
        let worker = Worker::spawn(RENDER_THREAD_NAME, move || {
            let backend = graphics_factory().map_err(AppError::Graphics)?;
            Ok::<_, AppError>(RenderState {
                backend: Box::new(backend),
                options,
                binding: None,
                session: RecordingSession::Idle,
                transform: IDENTITY_TRANSFORM,
                frames_rendered: 0,
            })
        })?;
        info!("Compositor pipeline created");

        Ok(Self {
            worker: Arc::new(worker),
            flags: Arc::new(SharedFlags::default()),
        })
    }

    /// Pipeline rendering with wgpu
    pub fn with_wgpu(options: CompositorOptions) -> AppResult<Self> {
        Self::new(options, WgpuBackend::new)
    }

    fn post<F>(&self, what: &str, task: F)
    where
        F: FnOnce(&mut RenderState) + Send + 'static,
    {
        if self.is_destroyed() || !self.worker.execute(task) {
            debug!(what, "Pipeline destroyed, ignoring");
        }
    }

    /// Bind a camera and a preview window.
    ///
    /// `sizing` receives the natural frame size and returns the preview size; it runs
    /// once per binding, before the preview surface is created from `preview`.
    pub fn bind_camera<S>(
        &self,
        source: Box<dyn FrameSource>,
        preview: Arc<dyn NativeWindow>,
        sizing: S,
    ) where
        S: Fn(FrameSize) -> FrameSize + Send + 'static,
    {
        let worker = Arc::downgrade(&self.worker);
        let flags = Arc::clone(&self.flags);
        self.post("bind_camera", move |state| {
            state.bind(source, preview, Box::new(sizing), worker, flags);
        });
    }

    /// Start recording. Ignored before a camera is bound or while recording.
    pub fn start(&self) {
        self.post("start", RenderState::start_recording);
    }

    /// Stop recording and finalize or discard the file. Ignored while idle.
    pub fn stop(&self) {
        self.post("stop", RenderState::stop_recording);
    }

    /// Block until all previously posted work has run
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        !self.is_destroyed() && self.worker.flush(timeout)
    }

    pub fn is_destroyed(&self) -> bool {
        self.flags.destroyed.load(Ordering::Acquire)
    }

    /// Finish any recording, release every resource and stop the worker.
    ///
    /// Waits at most [`timing::SHUTDOWN_TIMEOUT`]. Repeated calls return the first
    /// outcome without waiting again.
    pub fn destroy(&self) -> WorkerExit {
        if self.flags.destroyed.swap(true, Ordering::AcqRel) {
            return self.worker.await_termination(Duration::ZERO);
        }
        info!("Destroying compositor pipeline");
        self.worker.execute(RenderState::teardown);
        self.worker.shutdown();

        let exit = self.worker.await_termination(timing::SHUTDOWN_TIMEOUT);
        match exit {
            WorkerExit::Completed => debug!("Rendering worker finished"),
            WorkerExit::Panicked => error!("Rendering worker failed"),
            WorkerExit::TimedOut => warn!("Rendering worker still busy, detached"),
        }
        exit
    }
}

impl Drop for CompositorPipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}
