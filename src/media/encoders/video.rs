// SPDX-License-Identifier: MPL-2.0

//! H.264 encoder selection with hardware acceleration priority
//!
//! Hardware encoders are tried first, software encoders last. A preferred element
//! from the configuration is tried before the list.

use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info, warn};

/// Information about an available encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// GStreamer element name
    pub element_name: String,
    /// Display name
    pub display_name: String,
    /// Whether this is hardware accelerated
    pub is_hardware: bool,
    /// Priority (lower = higher priority)
    pub priority: u32,
}

/// Known H.264 encoders: element, display name, hardware, priority
const H264_ENCODERS: [(&str, &str, bool, u32); 8] = [
    ("vah264enc", "VA-API H.264 (HW)", true, 1),
    ("vaapih264enc", "VA-API H.264 (HW)", true, 2),
    ("nvh264enc", "NVIDIA H.264 (HW)", true, 3),
    ("qsvh264enc", "Intel QSV H.264 (HW)", true, 4),
    ("amfh264enc", "AMD AMF H.264 (HW)", true, 5),
    ("v4l2h264enc", "V4L2 H.264 (HW)", true, 6),
    ("x264enc", "x264 H.264 (SW)", false, 10),
    ("openh264enc", "OpenH264 H.264 (SW)", false, 11),
];

/// Element names in the order they are tried
pub fn h264_encoder_names() -> impl Iterator<Item = &'static str> {
    H264_ENCODERS.iter().map(|(name, ..)| *name)
}

/// Enumerate available H.264 encoders, sorted by priority
pub fn enumerate_h264_encoders() -> Vec<EncoderInfo> {
    let _ = gst::init();

    let mut available: Vec<EncoderInfo> = H264_ENCODERS
        .iter()
        .filter(|(name, ..)| gst::ElementFactory::find(name).is_some())
        .map(|(name, display, is_hardware, priority)| EncoderInfo {
            element_name: name.to_string(),
            display_name: display.to_string(),
            is_hardware: *is_hardware,
            priority: *priority,
        })
        .collect();
    available.sort_by_key(|e| e.priority);
    available
}

/// Create the best available H.264 encoder, configured for `bitrate_bps` and a key
/// frame every `key_frame_distance` frames.
///
/// Returns the element and its factory name.
pub fn select_h264_encoder(
    preferred: Option<&str>,
    bitrate_bps: u32,
    key_frame_distance: u32,
) -> Result<(gst::Element, String), String> {
    gst::init().map_err(|e| format!("Failed to initialize GStreamer: {}", e))?;

    let candidates = preferred
        .into_iter()
        .chain(h264_encoder_names().map(|name| -> &str { name }));
    for name in candidates {
        match gst::ElementFactory::make(name).build() {
            Ok(encoder) => {
                info!(encoder = %name, hardware = is_hardware(name), "Selected H.264 encoder");
                configure_h264_encoder(&encoder, name, bitrate_bps, key_frame_distance);
                return Ok((encoder, name.to_string()));
            }
            Err(e) => {
                if Some(name) == preferred {
                    warn!(encoder = %name, error = %e, "Preferred encoder unavailable");
                } else {
                    debug!(encoder = %name, "Encoder not available");
                }
            }
        }
    }

    Err("No H.264 encoder available. Please install gstreamer1-plugins-ugly (x264enc) or gstreamer1-plugin-openh264".to_string())
}

fn is_hardware(name: &str) -> bool {
    H264_ENCODERS
        .iter()
        .any(|(element, _, hardware, _)| *element == name && *hardware)
}

/// Set a property from its string form if the element has it.
///
/// String form parses into whatever integer or enum type the element declares.
fn set_if_present(encoder: &gst::Element, name: &str, value: &str) {
    if encoder.find_property(name).is_some() {
        encoder.set_property_from_str(name, value);
    } else {
        debug!(property = name, "Encoder lacks property");
    }
}

/// Set rate control and GOP length; property names differ per element
fn configure_h264_encoder(
    encoder: &gst::Element,
    encoder_name: &str,
    bitrate_bps: u32,
    key_frame_distance: u32,
) {
    let kbps = (bitrate_bps / 1000).to_string();
    let bps = bitrate_bps.to_string();
    let gop = key_frame_distance.to_string();

    let settings: Vec<(&str, &str)> = match encoder_name {
        "x264enc" => vec![
            ("speed-preset", "veryfast"),
            ("tune", "zerolatency"),
            ("bitrate", kbps.as_str()),
            ("key-int-max", gop.as_str()),
        ],
        "openh264enc" => vec![
            ("rate-control", "bitrate"),
            ("bitrate", bps.as_str()),
            ("usage-type", "camera"),
            ("gop-size", gop.as_str()),
        ],
        "vaapih264enc" => vec![
            ("rate-control", "cbr"),
            ("bitrate", kbps.as_str()),
            ("keyframe-period", gop.as_str()),
        ],
        "vah264enc" => vec![
            ("rate-control", "cbr"),
            ("bitrate", kbps.as_str()),
            ("key-int-max", gop.as_str()),
        ],
        "nvh264enc" | "amfh264enc" => vec![
            ("rate-control", "cbr"),
            ("rc-mode", "cbr"),
            ("bitrate", kbps.as_str()),
            ("gop-size", gop.as_str()),
        ],
        "qsvh264enc" => vec![("bitrate", kbps.as_str()), ("gop-size", gop.as_str())],
        "v4l2h264enc" => {
            debug!("Using V4L2 encoder with default configuration");
            Vec::new()
        }
        _ => {
            debug!(encoder = %encoder_name, "Unknown encoder type, using default configuration");
            Vec::new()
        }
    };

    for (name, value) in &settings {
        set_if_present(encoder, name, value);
    }
    debug!(
        encoder = %encoder_name,
        bitrate_bps,
        key_frame_distance,
        "Configured H.264 encoder"
    );
}
