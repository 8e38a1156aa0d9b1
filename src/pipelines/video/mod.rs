// SPDX-License-Identifier: MPL-2.0

//! Video recording: encoder drain loop and MP4 muxing
//!
//! - [`encoder`]: surface-input encoder whose output is drained on its own worker
//! - [`muxer`]: GStreamer MP4 muxer used by the default encoder backend

pub mod encoder;
pub mod muxer;

pub use crate::media::EncoderSettings;
pub use encoder::{DrainReport, VideoEncoder};
pub use muxer::GstMp4Muxer;
