// SPDX-License-Identifier: MPL-2.0

//! Test doubles shared by the integration tests
//!
//! - [`MockGraphics`]: records every rendering call and checks surface discipline
//! - [`MockEncoderBackend`]: scripted codec and muxer, writes a small file on finish
//! - [`MockFrameSource`]: frames are pushed by the test
//! - [`Harness`]: a compositor wired to all of the above and a manual clock

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use watercam::backends::SnapshotWindow;
use watercam::backends::camera::{
    BackendError, BackendResult, CameraFrame, FrameHandoff, FrameSize, FrameSource, Mat4,
    SensorRotation, TransformationInfo,
};
use watercam::errors::{EncoderError, EncoderResult, GraphicsError, GraphicsResult};
use watercam::gpu::{GraphicsBackend, NativeWindow, RenderedFrame, SurfaceId};
use watercam::media::{
    BufferFlags, BufferInfo, Codec, DequeueResult, EncoderBackend, EncoderSettings, Muxer,
    OutputFormat,
};
use watercam::pipelines::{CompositorOptions, CompositorPipeline, ManualClock, RecorderEvent};

pub const WAIT: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Graphics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum GfxCall {
    CreateSurface(SurfaceId),
    MakeCurrent(SurfaceId),
    ReleaseSurface(SurfaceId),
    Release,
    PrepareScene,
    UpdateTexture { timestamp_ns: i64 },
    SetViewport(FrameSize),
    DrawCamera { surface: SurfaceId, transform: Mat4 },
    DrawWatermark { surface: SurfaceId, alpha: f32 },
    SetPresentationTime { surface: SurfaceId, time_ns: i64 },
    SwapBuffers { surface: SurfaceId },
}

#[derive(Default)]
pub struct GfxState {
    pub calls: Vec<GfxCall>,
    pub live: HashMap<SurfaceId, Arc<dyn NativeWindow>>,
    pub released_surfaces: HashSet<SurfaceId>,
    pub current: Option<SurfaceId>,
    pub context_released: bool,
    pub violations: Vec<String>,
    pending_pts: HashMap<SurfaceId, i64>,
    next_id: u64,
}

/// Shared view of what a [`MockGraphics`] did
#[derive(Clone, Default)]
pub struct GraphicsSpy(Arc<Mutex<GfxState>>);

impl GraphicsSpy {
    pub fn state(&self) -> MutexGuard<'_, GfxState> {
        lock(&self.0)
    }

    pub fn calls(&self) -> Vec<GfxCall> {
        self.state().calls.clone()
    }

    pub fn watermark_alphas(&self) -> Vec<f32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GfxCall::DrawWatermark { alpha, .. } => Some(alpha),
                _ => None,
            })
            .collect()
    }

    pub fn presentation_times(&self) -> Vec<i64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GfxCall::SetPresentationTime { time_ns, .. } => Some(time_ns),
                _ => None,
            })
            .collect()
    }

    pub fn created_surfaces(&self) -> Vec<SurfaceId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GfxCall::CreateSurface(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

/// Rendering backend that only records
pub struct MockGraphics {
    spy: GraphicsSpy,
}

impl MockGraphics {
    pub fn new(spy: GraphicsSpy) -> Self {
        Self { spy }
    }

    fn require_current(state: &GfxState) -> GraphicsResult<SurfaceId> {
        if state.context_released {
            return Err(GraphicsError::ContextReleased);
        }
        state.current.ok_or(GraphicsError::NoCurrentSurface)
    }
}

impl GraphicsBackend for MockGraphics {
    fn create_surface(&mut self, window: Arc<dyn NativeWindow>) -> GraphicsResult<SurfaceId> {
        let mut state = self.spy.state();
        if state.context_released {
            return Err(GraphicsError::ContextReleased);
        }
        if window.size().is_empty() {
            return Err(GraphicsError::SurfaceCreation("empty window".into()));
        }
        state.next_id += 1;
        let id = SurfaceId(state.next_id);
        state.live.insert(id, window);
        state.calls.push(GfxCall::CreateSurface(id));
        Ok(id)
    }

    fn make_current(&mut self, surface: SurfaceId) -> GraphicsResult<()> {
        let mut state = self.spy.state();
        if !state.live.contains_key(&surface) {
            state
                .violations
                .push(format!("make_current on dead {}", surface));
            return Err(GraphicsError::UnknownSurface);
        }
        state.current = Some(surface);
        state.calls.push(GfxCall::MakeCurrent(surface));
        Ok(())
    }

    fn set_presentation_time(&mut self, surface: SurfaceId, time_ns: i64) -> GraphicsResult<()> {
        let mut state = self.spy.state();
        if !state.live.contains_key(&surface) {
            return Err(GraphicsError::UnknownSurface);
        }
        state.pending_pts.insert(surface, time_ns);
        state
            .calls
            .push(GfxCall::SetPresentationTime { surface, time_ns });
        Ok(())
    }

    fn swap_buffers(&mut self, surface: SurfaceId) -> GraphicsResult<()> {
        let (window, pts) = {
            let mut state = self.spy.state();
            let window = state
                .live
                .get(&surface)
                .cloned()
                .ok_or(GraphicsError::UnknownSurface)?;
            let pts = state.pending_pts.remove(&surface);
            state.calls.push(GfxCall::SwapBuffers { surface });
            (window, pts)
        };
        let size = window.size();
        window
            .queue_frame(RenderedFrame {
                width: size.width,
                height: size.height,
                data: vec![0; size.width as usize * size.height as usize * 4],
                presentation_time_ns: pts,
            })
            .map_err(GraphicsError::Present)
    }

    fn release_surface(&mut self, surface: SurfaceId) {
        let mut state = self.spy.state();
        if state.live.remove(&surface).is_none() {
            return;
        }
        if state.current == Some(surface) {
            if !state.live.is_empty() {
                state
                    .violations
                    .push(format!("released current {} while others live", surface));
            }
            state.current = None;
        }
        state.released_surfaces.insert(surface);
        state.calls.push(GfxCall::ReleaseSurface(surface));
    }

    fn release(&mut self) {
        let mut state = self.spy.state();
        if state.context_released {
            return;
        }
        let live: Vec<SurfaceId> = state.live.keys().copied().collect();
        for surface in live {
            state.live.remove(&surface);
            state.released_surfaces.insert(surface);
        }
        state.current = None;
        state.context_released = true;
        state.calls.push(GfxCall::Release);
    }

    fn prepare_scene(&mut self, _watermark: &image::RgbaImage) -> GraphicsResult<()> {
        let mut state = self.spy.state();
        if state.context_released {
            return Err(GraphicsError::ContextReleased);
        }
        state.calls.push(GfxCall::PrepareScene);
        Ok(())
    }

    fn update_camera_texture(&mut self, frame: &CameraFrame) -> GraphicsResult<()> {
        self.spy.state().calls.push(GfxCall::UpdateTexture {
            timestamp_ns: frame.timestamp_ns,
        });
        Ok(())
    }

    fn set_viewport(&mut self, size: FrameSize) {
        self.spy.state().calls.push(GfxCall::SetViewport(size));
    }

    fn draw_camera(&mut self, transform: &Mat4) -> GraphicsResult<()> {
        let mut state = self.spy.state();
        let surface = Self::require_current(&state)?;
        state.calls.push(GfxCall::DrawCamera {
            surface,
            transform: *transform,
        });
        Ok(())
    }

    fn draw_watermark(&mut self, alpha: f32) -> GraphicsResult<()> {
        let mut state = self.spy.state();
        let surface = Self::require_current(&state)?;
        state.calls.push(GfxCall::DrawWatermark { surface, alpha });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Scripted codec behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecOptions {
    /// `create_codec` fails
    pub fail_create: bool,
    /// Never announce the output format
    pub skip_format_change: bool,
    /// Announce the format again after the second frame
    pub duplicate_format_change: bool,
    /// Report a buffer index that was never handed out
    pub bogus_buffer_index: bool,
    /// Input surface rejects frames
    pub reject_input: bool,
}

enum Pending {
    FormatChanged,
    Buffer {
        info: BufferInfo,
        data: Option<Vec<u8>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MuxedSample {
    pub track: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub decode_time_us: Option<i64>,
    pub key_frame: bool,
}

#[derive(Default)]
pub struct EncoderState {
    pub settings: Vec<EncoderSettings>,
    pub frames_in: Vec<Option<i64>>,
    pub format_announced: bool,
    pub end_of_input: bool,
    pub codecs_stopped: usize,
    pub buffers_released: usize,
    pub muxers_created: usize,
    pub tracks: Vec<OutputFormat>,
    pub muxer_started: bool,
    pub muxer_stopped: bool,
    pub samples: Vec<MuxedSample>,
    /// Order of lifecycle calls across codec and muxer
    pub log: Vec<&'static str>,
    pending: VecDeque<Pending>,
}

/// Shared view of what the mock codec and muxer did
#[derive(Clone, Default)]
pub struct EncoderSpy(Arc<Mutex<EncoderState>>);

impl EncoderSpy {
    pub fn state(&self) -> MutexGuard<'_, EncoderState> {
        lock(&self.0)
    }

    /// Wait until `pred` holds or the timeout passes
    pub fn wait_for(&self, pred: impl Fn(&EncoderState) -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < WAIT {
            if pred(&self.state()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

pub struct MockInputSurface {
    size: FrameSize,
    options: CodecOptions,
    spy: EncoderSpy,
}

impl MockInputSurface {
    /// Encode one frame as if the GPU had drawn it
    pub fn encode(&self, presentation_time_ns: Option<i64>) -> Result<(), String> {
        self.queue_frame(RenderedFrame {
            width: self.size.width,
            height: self.size.height,
            data: vec![0; self.size.width as usize * self.size.height as usize * 4],
            presentation_time_ns,
        })
    }
}

impl NativeWindow for MockInputSurface {
    fn size(&self) -> FrameSize {
        self.size
    }

    fn queue_frame(&self, frame: RenderedFrame) -> Result<(), String> {
        if self.options.reject_input {
            return Err("input surface flushing".into());
        }
        let mut state = self.spy.state();
        if state.end_of_input {
            return Err("input after end of stream".into());
        }
        state.frames_in.push(frame.presentation_time_ns);
        let frame_no = state.frames_in.len();

        if !state.format_announced && !self.options.skip_format_change {
            state.format_announced = true;
            state.pending.push_back(Pending::FormatChanged);
            state.pending.push_back(Pending::Buffer {
                info: BufferInfo {
                    offset: 0,
                    size: 4,
                    presentation_time_us: 0,
                    decode_time_us: None,
                    flags: BufferFlags {
                        codec_config: true,
                        ..Default::default()
                    },
                },
                data: Some(vec![0, 0, 0, 1]),
            });
        }
        if self.options.duplicate_format_change && frame_no == 2 {
            state.pending.push_back(Pending::FormatChanged);
        }

        let info = BufferInfo {
            offset: 0,
            size: 16,
            presentation_time_us: frame.presentation_time_ns.unwrap_or(0) / 1_000,
            // Decode order is input order
            decode_time_us: Some(frame_no as i64 - 1),
            flags: BufferFlags {
                key_frame: frame_no == 1,
                ..Default::default()
            },
        };
        let data = if self.options.bogus_buffer_index {
            None
        } else {
            Some(vec![frame_no as u8; 16])
        };
        state.pending.push_back(Pending::Buffer { info, data });
        Ok(())
    }
}

pub struct MockCodec {
    surface: Arc<MockInputSurface>,
    spy: EncoderSpy,
    settings: EncoderSettings,
    buffers: HashMap<usize, Vec<u8>>,
    next_index: usize,
    eos_sent: bool,
}

impl Codec for MockCodec {
    fn input_surface(&self) -> Arc<dyn NativeWindow> {
        self.surface.clone()
    }

    fn dequeue_output(&mut self, timeout: Duration) -> EncoderResult<DequeueResult> {
        let mut state = self.spy.state();
        let index = self.next_index;
        match state.pending.pop_front() {
            Some(Pending::FormatChanged) => Ok(DequeueResult::OutputFormatChanged),
            Some(Pending::Buffer { info, data }) => {
                self.next_index += 1;
                if let Some(data) = data {
                    self.buffers.insert(index, data);
                }
                Ok(DequeueResult::Buffer { index, info })
            }
            None if state.end_of_input && !self.eos_sent => {
                self.eos_sent = true;
                self.next_index += 1;
                self.buffers.insert(index, Vec::new());
                Ok(DequeueResult::Buffer {
                    index,
                    info: BufferInfo {
                        flags: BufferFlags {
                            end_of_stream: true,
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                })
            }
            None => {
                drop(state);
                std::thread::sleep(timeout.min(Duration::from_millis(1)));
                Ok(DequeueResult::TryAgainLater)
            }
        }
    }

    fn output_format(&self) -> Option<OutputFormat> {
        if !self.spy.state().format_announced {
            return None;
        }
        Some(OutputFormat {
            mime_type: "video/avc".into(),
            width: self.settings.width,
            height: self.settings.height,
            frame_rate: self.settings.frame_rate,
            codec_data: Some(vec![1, 2, 3, 4]),
        })
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(&index).map(Vec::as_slice)
    }

    fn release_output_buffer(&mut self, index: usize) {
        if self.buffers.remove(&index).is_some() {
            self.spy.state().buffers_released += 1;
        }
    }

    fn signal_end_of_input(&mut self) -> EncoderResult<()> {
        let mut state = self.spy.state();
        state.end_of_input = true;
        state.log.push("codec.end_of_input");
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.spy.state();
        state.codecs_stopped += 1;
        state.log.push("codec.stop");
    }
}

pub struct MockMuxer {
    path: PathBuf,
    spy: EncoderSpy,
    started: bool,
}

impl Muxer for MockMuxer {
    fn add_track(&mut self, format: &OutputFormat) -> EncoderResult<usize> {
        let mut state = self.spy.state();
        state.tracks.push(format.clone());
        Ok(state.tracks.len() - 1)
    }

    fn start(&mut self) -> EncoderResult<()> {
        std::fs::write(&self.path, b"").map_err(|e| EncoderError::Muxer(e.to_string()))?;
        self.started = true;
        let mut state = self.spy.state();
        state.muxer_started = true;
        state.log.push("muxer.start");
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> EncoderResult<()> {
        if !self.started {
            return Err(EncoderError::MuxerNotStarted);
        }
        assert!(data.len() >= info.offset + info.size);
        self.spy.state().samples.push(MuxedSample {
            track,
            size: info.size,
            presentation_time_us: info.presentation_time_us,
            decode_time_us: info.decode_time_us,
            key_frame: info.flags.key_frame,
        });
        Ok(())
    }

    fn stop(&mut self) -> EncoderResult<()> {
        let samples = self.spy.state().samples.len();
        std::fs::write(&self.path, format!("mp4 with {} samples", samples))
            .map_err(|e| EncoderError::Muxer(e.to_string()))?;
        let mut state = self.spy.state();
        state.muxer_stopped = true;
        state.log.push("muxer.stop");
        Ok(())
    }
}

pub struct MockEncoderBackend {
    pub spy: EncoderSpy,
    pub options: CodecOptions,
    /// Input surface of the most recent codec
    pub last_surface: Mutex<Option<Arc<MockInputSurface>>>,
}

impl MockEncoderBackend {
    pub fn new(options: CodecOptions) -> Self {
        Self {
            spy: EncoderSpy::default(),
            options,
            last_surface: Mutex::new(None),
        }
    }

    pub fn last_surface(&self) -> Option<Arc<MockInputSurface>> {
        lock(&self.last_surface).clone()
    }
}

impl EncoderBackend for MockEncoderBackend {
    fn create_codec(&self, settings: &EncoderSettings) -> EncoderResult<Box<dyn Codec>> {
        if self.options.fail_create {
            return Err(EncoderError::NotAvailable("no encoder in test".into()));
        }
        self.spy.state().settings.push(settings.clone());
        let surface = Arc::new(MockInputSurface {
            size: FrameSize::new(settings.width, settings.height),
            options: self.options,
            spy: self.spy.clone(),
        });
        *lock(&self.last_surface) = Some(surface.clone());
        Ok(Box::new(MockCodec {
            surface,
            spy: self.spy.clone(),
            settings: settings.clone(),
            buffers: HashMap::new(),
            next_index: 0,
            eos_sent: false,
        }))
    }

    fn create_muxer(&self, path: &Path) -> EncoderResult<Box<dyn Muxer>> {
        self.spy.state().muxers_created += 1;
        Ok(Box::new(MockMuxer {
            path: path.to_path_buf(),
            spy: self.spy.clone(),
            started: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Frame source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SourceState {
    pub handoff: Option<FrameHandoff>,
    pub starts: usize,
    pub stops: usize,
}

#[derive(Clone, Default)]
pub struct SourceSpy(Arc<Mutex<SourceState>>);

impl SourceSpy {
    pub fn state(&self) -> MutexGuard<'_, SourceState> {
        lock(&self.0)
    }

    /// Deliver a frame the way a capture thread would. Returns false when stopped.
    pub fn push(&self, frame: CameraFrame) -> bool {
        let handoff = self.state().handoff.clone();
        match handoff {
            Some(handoff) => {
                handoff.submit(frame);
                true
            }
            None => false,
        }
    }
}

pub struct MockFrameSource {
    info: Option<TransformationInfo>,
    fail_start: bool,
    spy: SourceSpy,
}

impl MockFrameSource {
    pub fn new(info: TransformationInfo, spy: SourceSpy) -> Self {
        Self {
            info: Some(info),
            fail_start: false,
            spy,
        }
    }

    pub fn without_info(spy: SourceSpy) -> Self {
        Self {
            info: None,
            fail_start: false,
            spy,
        }
    }

    pub fn failing_start(info: TransformationInfo, spy: SourceSpy) -> Self {
        Self {
            info: Some(info),
            fail_start: true,
            spy,
        }
    }
}

impl FrameSource for MockFrameSource {
    fn transformation_info(&self) -> BackendResult<TransformationInfo> {
        self.info
            .ok_or_else(|| BackendError::NotAvailable("geometry unknown".into()))
    }

    fn start(&mut self, handoff: FrameHandoff) -> BackendResult<()> {
        if self.fail_start {
            return Err(BackendError::DeviceNotFound("/dev/video9".into()));
        }
        let mut state = self.spy.state();
        state.handoff = Some(handoff);
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.spy.state();
        state.handoff = None;
        state.stops += 1;
    }
}

pub fn frame(width: u32, height: u32, timestamp_ns: i64) -> CameraFrame {
    CameraFrame::from_rgba(
        width,
        height,
        vec![128u8; width as usize * height as usize * 4],
        timestamp_ns,
    )
}

pub fn info(width: u32, height: u32, rotation: SensorRotation) -> TransformationInfo {
    TransformationInfo {
        crop: FrameSize::new(width, height),
        rotation,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Compositor wired to mocks, writing into a temporary directory
pub struct Harness {
    pub pipeline: CompositorPipeline,
    pub events: UnboundedReceiver<RecorderEvent>,
    pub graphics: GraphicsSpy,
    pub encoder: Arc<MockEncoderBackend>,
    pub source: SourceSpy,
    pub preview: Arc<SnapshotWindow>,
    pub clock: ManualClock,
    pub output: PathBuf,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CodecOptions::default(), |_| {})
    }

    pub fn with(codec: CodecOptions, configure: impl FnOnce(&mut CompositorOptions)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("clip.mp4");
        let clock = ManualClock::new(0);
        let encoder = Arc::new(MockEncoderBackend::new(codec));
        let (tx, events) = tokio::sync::mpsc::unbounded_channel();

        let mut options = CompositorOptions::new(
            image::RgbaImage::from_pixel(8, 8, image::Rgba([255, 255, 255, 255])),
            encoder.clone(),
            output.clone(),
            Arc::new(clock.clone()),
            tx,
        );
        configure(&mut options);

        let graphics = GraphicsSpy::default();
        let factory_spy = graphics.clone();
        let pipeline =
            CompositorPipeline::new(options, move || Ok(MockGraphics::new(factory_spy)))
                .unwrap();

        Self {
            pipeline,
            events,
            graphics,
            encoder,
            source: SourceSpy::default(),
            preview: Arc::new(SnapshotWindow::new(FrameSize::default())),
            clock,
            output,
            _dir: dir,
        }
    }

    /// Bind a mock camera; the preview is half the frame size
    pub fn bind(&self, info: TransformationInfo) {
        self.bind_source(Box::new(MockFrameSource::new(info, self.source.clone())));
    }

    pub fn bind_source(&self, source: Box<dyn FrameSource>) {
        let window = self.preview.clone();
        self.pipeline
            .bind_camera(source, self.preview.clone(), move |size| {
                let view = FrameSize::new(size.width / 2, size.height / 2);
                window.resize(view);
                view
            });
        assert!(self.pipeline.wait_idle(WAIT));
    }

    /// Push a frame and wait until it was composited
    pub fn push_frame(&self, width: u32, height: u32, timestamp_ns: i64) {
        assert!(self.source.push(frame(width, height, timestamp_ns)));
        assert!(self.pipeline.wait_idle(WAIT));
    }

    pub fn start_at(&self, ms: u64) {
        self.clock.set(ms);
        self.pipeline.start();
        assert!(self.pipeline.wait_idle(WAIT));
    }

    pub fn stop_at(&self, ms: u64) {
        self.clock.set(ms);
        self.pipeline.stop();
        assert!(self.pipeline.wait_idle(WAIT));
    }

    pub fn take_events(&mut self) -> Vec<RecorderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
