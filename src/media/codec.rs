// SPDX-License-Identifier: MPL-2.0

//! Codec and muxer abstractions
//!
//! The encoder drain loop is written against these traits. A codec takes rendered
//! frames through its input surface and hands out encoded buffers by index; a muxer
//! writes those buffers into a container file.

use crate::constants::encoder;
use crate::errors::EncoderResult;
use crate::gpu::NativeWindow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Parameters for one encoding session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
    /// GStreamer element to try before the built-in priority list
    pub preferred_encoder: Option<String>,
}

impl EncoderSettings {
    /// Default parameters for a `width` x `height` stream
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bitrate_bps: encoder::BITRATE_BPS,
            frame_rate: encoder::FRAME_RATE,
            key_frame_interval_secs: encoder::KEY_FRAME_INTERVAL_SECS,
            preferred_encoder: None,
        }
    }

    /// Frames between two key frames
    pub fn key_frame_distance(&self) -> u32 {
        (self.frame_rate * self.key_frame_interval_secs).max(1)
    }
}

/// Flags attached to an encoded buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Codec configuration data (SPS/PPS), not a media sample
    pub codec_config: bool,
    /// Sync sample
    pub key_frame: bool,
    /// Last buffer the codec will produce
    pub end_of_stream: bool,
}

/// Metadata of an encoded buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    /// Decode timestamp, when the codec reports one. Differs from the
    /// presentation time once frames are reordered.
    pub decode_time_us: Option<i64>,
    pub flags: BufferFlags,
}

/// Format of the codec's output, known once the codec has produced data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// AVC decoder configuration record
    pub codec_data: Option<Vec<u8>>,
}

/// Result of polling the codec for output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DequeueResult {
    /// Nothing available right now
    TryAgainLater,
    /// [`Codec::output_format`] now returns the final format
    OutputFormatChanged,
    /// An encoded buffer, to be returned with [`Codec::release_output_buffer`]
    Buffer { index: usize, info: BufferInfo },
}

/// Video encoder taking frames through a rendering surface
pub trait Codec: Send {
    /// Window that rendered frames are queued on
    fn input_surface(&self) -> Arc<dyn NativeWindow>;

    /// Wait up to `timeout` for output
    fn dequeue_output(&mut self, timeout: Duration) -> EncoderResult<DequeueResult>;

    /// Output format, after [`DequeueResult::OutputFormatChanged`]
    fn output_format(&self) -> Option<OutputFormat>;

    /// Bytes of a dequeued buffer, `None` if `index` was never handed out
    fn output_buffer(&self, index: usize) -> Option<&[u8]>;

    /// Give a dequeued buffer back
    fn release_output_buffer(&mut self, index: usize);

    /// No more input will arrive; the codec flushes and ends with an EOS buffer
    fn signal_end_of_input(&mut self) -> EncoderResult<()>;

    /// Stop and release the codec
    fn stop(&mut self);
}

/// Container writer
pub trait Muxer: Send {
    /// Add a track for `format`, returning its index
    fn add_track(&mut self, format: &OutputFormat) -> EncoderResult<usize>;

    /// Begin writing. Tracks cannot be added afterwards.
    fn start(&mut self) -> EncoderResult<()>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> EncoderResult<()>;

    /// Finalize the file and release the muxer
    fn stop(&mut self) -> EncoderResult<()>;
}

/// Factory for codecs and muxers
pub trait EncoderBackend: Send + Sync {
    fn create_codec(&self, settings: &EncoderSettings) -> EncoderResult<Box<dyn Codec>>;

    fn create_muxer(&self, path: &Path) -> EncoderResult<Box<dyn Muxer>>;
}
