// SPDX-License-Identifier: MPL-2.0

//! GStreamer H.264 codec
//!
//! ```text
//! appsrc (RGBA) -> videoconvert -> <h264 encoder> -> h264parse
//!   -> capsfilter (stream-format=avc, alignment=au) -> appsink
//! ```
//!
//! Rendered frames enter through [`GstInputSurface`]; encoded access units are
//! pulled from the appsink by the drain loop.

use super::codec::{
    BufferFlags, BufferInfo, Codec, DequeueResult, EncoderBackend, EncoderSettings, Muxer,
    OutputFormat,
};
use super::encoders::select_h264_encoder;
use crate::backends::camera::FrameSize;
use crate::constants::encoder::MIME_TYPE;
use crate::errors::{EncoderError, EncoderResult};
use crate::gpu::{NativeWindow, RenderedFrame};
use crate::pipelines::video::muxer::GstMp4Muxer;
use gstreamer as gst;
use gstreamer::buffer::{MappedBuffer, Readable};
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Codec input: accepts rendered frames and pushes them into the appsrc
pub struct GstInputSurface {
    appsrc: AppSrc,
    size: FrameSize,
    frame_duration: gst::ClockTime,
    // Presentation times are rebased so the stream starts at zero
    base_ns: Mutex<Option<i64>>,
    frames: AtomicU64,
}

impl GstInputSurface {
    fn pts_for(&self, presentation_time_ns: Option<i64>) -> gst::ClockTime {
        let count = self.frames.fetch_add(1, Ordering::Relaxed);
        match presentation_time_ns {
            Some(ns) => {
                let base = match self.base_ns.lock() {
                    Ok(mut base) => *base.get_or_insert(ns),
                    Err(_) => ns,
                };
                gst::ClockTime::from_nseconds((ns - base).max(0) as u64)
            }
            None => self.frame_duration * count,
        }
    }
}

impl NativeWindow for GstInputSurface {
    fn size(&self) -> FrameSize {
        self.size
    }

    fn queue_frame(&self, frame: RenderedFrame) -> Result<(), String> {
        if frame.width != self.size.width || frame.height != self.size.height {
            return Err(format!(
                "Frame size {}x{} doesn't match encoder {}",
                frame.width, frame.height, self.size
            ));
        }

        let pts = self.pts_for(frame.presentation_time_ns);
        let mut buffer = gst::Buffer::from_mut_slice(frame.data);
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| "Failed to get mutable buffer reference".to_string())?;
            buffer_ref.set_pts(pts);
            buffer_ref.set_duration(self.frame_duration);
        }

        trace!(pts = %pts, "Queueing frame on encoder input");
        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| format!("Failed to push buffer: {:?}", e))
    }
}

/// H.264 encoder pipeline implementing [`Codec`]
pub struct GstCodec {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    appsink: AppSink,
    surface: Arc<GstInputSurface>,
    encoder_name: String,
    frame_rate: u32,
    format: Option<OutputFormat>,
    // First sample, held back while the format change is reported
    pending: Option<gst::Sample>,
    buffers: HashMap<usize, MappedBuffer<Readable>>,
    next_index: usize,
    eos_reported: bool,
    stopped: bool,
}

/// HEADER marks codec configuration; anything that is not a delta unit is a sync sample
fn buffer_flags(flags: gst::BufferFlags) -> BufferFlags {
    BufferFlags {
        codec_config: flags.contains(gst::BufferFlags::HEADER),
        key_frame: !flags.contains(gst::BufferFlags::DELTA_UNIT),
        end_of_stream: false,
    }
}

fn make(factory: &str) -> EncoderResult<gst::Element> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|e| EncoderError::ConfigurationFailed(format!("Failed to create {}: {}", factory, e)))
}

impl GstCodec {
    /// Build and start the encoder pipeline
    pub fn new(settings: &EncoderSettings) -> EncoderResult<Self> {
        info!(
            width = settings.width,
            height = settings.height,
            bitrate = settings.bitrate_bps,
            fps = settings.frame_rate,
            "Creating H.264 codec"
        );
        gst::init().map_err(|e| EncoderError::NotAvailable(e.to_string()))?;

        let (encoder, encoder_name) = select_h264_encoder(
            settings.preferred_encoder.as_deref(),
            settings.bitrate_bps,
            settings.key_frame_distance(),
        )
        .map_err(EncoderError::NotAvailable)?;

        let pipeline = gst::Pipeline::new();
        let appsrc = make("appsrc")?
            .downcast::<AppSrc>()
            .map_err(|_| EncoderError::ConfigurationFailed("Failed to downcast to AppSrc".into()))?;
        let convert = make("videoconvert")?;
        let parser = make("h264parse")?;
        let capsfilter = make("capsfilter")?;
        let appsink = make("appsink")?
            .downcast::<AppSink>()
            .map_err(|_| EncoderError::ConfigurationFailed("Failed to downcast to AppSink".into()))?;

        let input_caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGBA")
            .field("width", settings.width as i32)
            .field("height", settings.height as i32)
            .field("framerate", gst::Fraction::new(settings.frame_rate as i32, 1))
            .build();
        appsrc.set_caps(Some(&input_caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);
        appsrc.set_do_timestamp(false);

        capsfilter.set_property(
            "caps",
            gst::Caps::builder("video/x-h264")
                .field("stream-format", "avc")
                .field("alignment", "au")
                .build(),
        );

        appsink.set_property("sync", false);
        appsink.set_property("enable-last-sample", false);

        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &convert,
                &encoder,
                &parser,
                &capsfilter,
                appsink.upcast_ref(),
            ])
            .map_err(|e| EncoderError::ConfigurationFailed(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([
            appsrc.upcast_ref(),
            &convert,
            &encoder,
            &parser,
            &capsfilter,
            appsink.upcast_ref(),
        ])
        .map_err(|e| EncoderError::ConfigurationFailed(format!("Failed to link elements: {}", e)))?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            EncoderError::ConfigurationFailed(format!("Failed to start encoder: {}", e))
        })?;

        let frame_rate = settings.frame_rate.max(1);
        let surface = Arc::new(GstInputSurface {
            appsrc: appsrc.clone(),
            size: FrameSize::new(settings.width, settings.height),
            frame_duration: gst::ClockTime::SECOND / frame_rate as u64,
            base_ns: Mutex::new(None),
            frames: AtomicU64::new(0),
        });

        info!(encoder = %encoder_name, "H.264 codec started");
        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            surface,
            encoder_name,
            frame_rate,
            format: None,
            pending: None,
            buffers: HashMap::new(),
            next_index: 0,
            eos_reported: false,
            stopped: false,
        })
    }

    fn output_format_from(&self, sample: &gst::Sample) -> EncoderResult<OutputFormat> {
        let caps = sample
            .caps()
            .ok_or_else(|| EncoderError::Pipeline("Encoded sample has no caps".into()))?;
        let structure = caps
            .structure(0)
            .ok_or_else(|| EncoderError::Pipeline("Encoded caps are empty".into()))?;

        let width = structure.get::<i32>("width").unwrap_or(self.surface.size.width as i32);
        let height = structure.get::<i32>("height").unwrap_or(self.surface.size.height as i32);
        let codec_data = structure
            .get::<gst::Buffer>("codec_data")
            .ok()
            .and_then(|buffer| buffer.map_readable().ok().map(|map| map.as_slice().to_vec()));

        Ok(OutputFormat {
            mime_type: MIME_TYPE.to_string(),
            width: width as u32,
            height: height as u32,
            frame_rate: self.frame_rate,
            codec_data,
        })
    }

    fn hand_out(&mut self, buffer: gst::Buffer, flags: BufferFlags) -> EncoderResult<DequeueResult> {
        let presentation_time_us = buffer.pts().map(|t| t.useconds() as i64).unwrap_or(0);
        let decode_time_us = buffer.dts().map(|t| t.useconds() as i64);
        let mapped = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| EncoderError::Pipeline("Failed to map encoded buffer".into()))?;

        let index = self.next_index;
        self.next_index += 1;
        let info = BufferInfo {
            offset: 0,
            size: mapped.len(),
            presentation_time_us,
            decode_time_us,
            flags,
        };
        self.buffers.insert(index, mapped);
        Ok(DequeueResult::Buffer { index, info })
    }

    fn hand_out_sample(&mut self, sample: gst::Sample) -> EncoderResult<DequeueResult> {
        let buffer = sample
            .buffer_owned()
            .ok_or_else(|| EncoderError::Pipeline("Encoded sample has no buffer".into()))?;
        let flags = buffer_flags(buffer.flags());
        self.hand_out(buffer, flags)
    }

    /// Error posted on the pipeline bus, if any
    fn bus_error(&self) -> Option<EncoderError> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(err) => {
                error!(
                    error = %err.error(),
                    debug = ?err.debug(),
                    source = ?err.src().map(|s| s.name()),
                    "GStreamer error in encoder"
                );
                Some(EncoderError::Pipeline(err.error().to_string()))
            }
            _ => None,
        }
    }
}

impl Codec for GstCodec {
    fn input_surface(&self) -> Arc<dyn NativeWindow> {
        self.surface.clone()
    }

    fn dequeue_output(&mut self, timeout: Duration) -> EncoderResult<DequeueResult> {
        if let Some(sample) = self.pending.take() {
            return self.hand_out_sample(sample);
        }
        if self.eos_reported || self.stopped {
            return Ok(DequeueResult::TryAgainLater);
        }

        let wait = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        match self.appsink.try_pull_sample(wait) {
            Some(sample) if self.format.is_none() => {
                let format = self.output_format_from(&sample)?;
                debug!(
                    width = format.width,
                    height = format.height,
                    codec_data = format.codec_data.as_ref().map(Vec::len),
                    "Encoder output format known"
                );
                self.format = Some(format);
                self.pending = Some(sample);
                Ok(DequeueResult::OutputFormatChanged)
            }
            Some(sample) => self.hand_out_sample(sample),
            None if self.appsink.is_eos() => {
                self.eos_reported = true;
                let flags = BufferFlags {
                    end_of_stream: true,
                    ..Default::default()
                };
                self.hand_out(gst::Buffer::new(), flags)
            }
            None => match self.bus_error() {
                Some(err) => Err(err),
                None => Ok(DequeueResult::TryAgainLater),
            },
        }
    }

    fn output_format(&self) -> Option<OutputFormat> {
        self.format.clone()
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.buffers.get(&index).map(|buffer| buffer.as_slice())
    }

    fn release_output_buffer(&mut self, index: usize) {
        self.buffers.remove(&index);
    }

    fn signal_end_of_input(&mut self) -> EncoderResult<()> {
        debug!("Signalling end of input to encoder");
        self.appsrc
            .end_of_stream()
            .map(|_| ())
            .map_err(|e| EncoderError::Pipeline(format!("Failed to send EOS: {:?}", e)))
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.pending = None;
        self.buffers.clear();
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %e, "Failed to stop encoder pipeline");
        }
        info!(encoder = %self.encoder_name, "H.264 codec stopped");
    }
}

impl Drop for GstCodec {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Creates [`GstCodec`]s and MP4 muxers
#[derive(Debug, Clone, Copy, Default)]
pub struct GstEncoderBackend;

impl EncoderBackend for GstEncoderBackend {
    fn create_codec(&self, settings: &EncoderSettings) -> EncoderResult<Box<dyn Codec>> {
        Ok(Box::new(GstCodec::new(settings)?))
    }

    fn create_muxer(&self, path: &Path) -> EncoderResult<Box<dyn Muxer>> {
        Ok(Box::new(GstMp4Muxer::new(path)?))
    }
}
