// SPDX-License-Identifier: MPL-2.0

//! H.264 encoder selection and detection
//!
//! - Hardware encoder priority with software fallbacks
//! - Per-element rate control and GOP configuration
//! - Detection of installed encoders and required elements

pub mod detection;
pub mod video;

pub use detection::{log_available_encoders, missing_required_elements};
pub use video::{EncoderInfo, enumerate_h264_encoders, select_h264_encoder};
