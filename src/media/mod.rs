// SPDX-License-Identifier: MPL-2.0

//! Media encoding
//!
//! # Codec model
//!
//! The [`codec`] module defines the surface-input codec and the container muxer the
//! recording pipeline drains into. Encoded buffers are handed out by index and
//! returned after use; the output format becomes known only once the codec has
//! produced its first data.
//!
//! # Modules
//!
//! - [`codec`]: `Codec`, `Muxer` and `EncoderBackend` traits plus buffer metadata
//! - [`encoders`]: H.264 encoder selection and detection
//! - [`gst_codec`]: GStreamer implementation of the codec

pub mod codec;
pub mod encoders;
pub mod gst_codec;

pub use codec::{
    BufferFlags, BufferInfo, Codec, DequeueResult, EncoderBackend, EncoderSettings, Muxer,
    OutputFormat,
};
pub use gst_codec::{GstCodec, GstEncoderBackend};
