// SPDX-License-Identifier: MPL-2.0

//! GStreamer frame source
//!
//! Captures from V4L2, PipeWire or a test pattern and delivers RGBA frames, scaled to
//! a fixed size, into a [`FrameHandoff`]:
//!
//! ```text
//! <source> ! videoconvert ! videoscale ! video/x-raw,format=RGBA,... ! appsink
//! ```

use super::types::*;
use super::{FrameHandoff, FrameSource};
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// V4L2 device node, or the default device
    V4l2 { device: Option<String> },
    /// Default PipeWire camera node
    PipeWire,
    /// Moving test pattern, needs no hardware
    TestPattern,
}

impl SourceKind {
    fn launch_fragment(&self) -> String {
        match self {
            SourceKind::V4l2 { device: Some(device) } => format!("v4l2src device={}", device),
            SourceKind::V4l2 { device: None } => "v4l2src".to_string(),
            SourceKind::PipeWire => "pipewiresrc".to_string(),
            SourceKind::TestPattern => "videotestsrc is-live=true pattern=ball".to_string(),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::V4l2 { device: Some(device) } => write!(f, "V4L2 ({})", device),
            SourceKind::V4l2 { device: None } => write!(f, "V4L2"),
            SourceKind::PipeWire => write!(f, "PipeWire"),
            SourceKind::TestPattern => write!(f, "test pattern"),
        }
    }
}

/// Frame source backed by a GStreamer capture pipeline
pub struct GstFrameSource {
    kind: SourceKind,
    size: FrameSize,
    framerate: Option<u32>,
    rotation: SensorRotation,
    running: Option<(gstreamer::Pipeline, AppSink)>,
}

impl GstFrameSource {
    /// Create a source producing `size` frames.
    ///
    /// `rotation` is the mounting rotation of the sensor; frames are delivered in
    /// buffer orientation with a texture transform that corrects it.
    pub fn new(kind: SourceKind, size: FrameSize, framerate: Option<u32>, rotation: SensorRotation) -> Self {
        Self {
            kind,
            size,
            framerate,
            rotation,
            running: None,
        }
    }

    fn launch_line(&self) -> String {
        let mut caps = format!(
            "video/x-raw,format=RGBA,width=(int){},height=(int){}",
            self.size.width, self.size.height
        );
        if let Some(fps) = self.framerate {
            caps.push_str(&format!(",framerate=(fraction){}/1", fps));
        }
        format!(
            "{} ! videoconvert ! videoscale ! videorate ! {} ! appsink name=sink",
            self.kind.launch_fragment(),
            caps
        )
    }
}

impl FrameSource for GstFrameSource {
    fn transformation_info(&self) -> BackendResult<TransformationInfo> {
        if self.size.is_empty() {
            return Err(BackendError::FormatNotSupported(format!(
                "invalid capture size {}",
                self.size
            )));
        }
        Ok(TransformationInfo {
            crop: self.size,
            rotation: self.rotation,
        })
    }

    fn start(&mut self, handoff: FrameHandoff) -> BackendResult<()> {
        if self.running.is_some() {
            warn!("Frame source already started");
            return Ok(());
        }

        gstreamer::init().map_err(|e| BackendError::Pipeline(e.to_string()))?;

        let launch = self.launch_line();
        info!(source = %self.kind, pipeline = %launch, "Starting frame source");

        let pipeline = gstreamer::parse::launch(&launch)
            .map_err(|e| BackendError::Pipeline(format!("{}: {}", self.kind, e)))?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| {
                BackendError::Pipeline("Launch line is not a pipeline".to_string())
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| BackendError::Pipeline("Failed to get appsink".to_string()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| {
                BackendError::Pipeline("Failed to cast appsink".to_string())
            })?;

        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        let transform = self.rotation.texture_transform();
        let frame_counter = Arc::new(AtomicU64::new(0));
        let started = Instant::now();

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let frame_num = frame_counter.fetch_add(1, Ordering::Relaxed);

                    let sample = appsink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;
                    let caps = sample.caps().ok_or(gstreamer::FlowError::Error)?;
                    let video_info = VideoInfo::from_caps(caps).map_err(|e| {
                        error!(frame = frame_num, error = ?e, "Failed to get video info");
                        gstreamer::FlowError::Error
                    })?;

                    let buffer = sample.buffer_owned().ok_or(gstreamer::FlowError::Error)?;
                    if buffer.flags().contains(gstreamer::BufferFlags::CORRUPTED) {
                        debug!(frame = frame_num, "Skipping corrupted buffer");
                        return Ok(gstreamer::FlowSuccess::Ok);
                    }

                    // Live sources stamp buffers with running time; fall back to wall time
                    let timestamp_ns = buffer
                        .pts()
                        .map(|pts| pts.nseconds() as i64)
                        .unwrap_or_else(|| started.elapsed().as_nanos() as i64);

                    let mapped = buffer.into_mapped_buffer_readable().map_err(|_| {
                        error!(frame = frame_num, "Failed to map buffer");
                        gstreamer::FlowError::Error
                    })?;

                    handoff.submit(CameraFrame {
                        width: video_info.width(),
                        height: video_info.height(),
                        data: FramePixels::mapped(mapped),
                        stride: video_info.stride()[0] as u32,
                        transform,
                        timestamp_ns,
                    });

                    if frame_num % 120 == 0 {
                        debug!(
                            frame = frame_num,
                            width = video_info.width(),
                            height = video_info.height(),
                            timestamp_ns,
                            "Frame delivered"
                        );
                    }
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline.set_state(gstreamer::State::Playing).map_err(|e| {
            BackendError::Pipeline(format!("Failed to start pipeline: {}", e))
        })?;

        self.running = Some((pipeline, appsink));
        Ok(())
    }

    fn stop(&mut self) {
        let Some((pipeline, appsink)) = self.running.take() else {
            return;
        };
        info!(source = %self.kind, "Stopping frame source");
        // Drop the callback first so it releases its handoff reference
        appsink.set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
            warn!(error = %e, "Failed to stop capture pipeline");
        }
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}
