// SPDX-License-Identifier: GPL-3.0-only

//! Frame geometry, pixel storage and source errors

use gstreamer::buffer::{MappedBuffer, Readable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Column-major 4x4 matrix, the layout WGSL `mat4x4<f32>` expects
pub type Mat4 = [f32; 16];

/// Identity texture transform
pub const IDENTITY_TRANSFORM: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Pixel bytes of a frame.
///
/// Frames from GStreamer keep their buffer mapped until the last clone is dropped,
/// so the capture thread never copies.
#[derive(Clone)]
pub enum FramePixels {
    Owned(Arc<[u8]>),
    Gst(Arc<MappedBuffer<Readable>>),
}

impl FramePixels {
    pub fn mapped(buffer: MappedBuffer<Readable>) -> Self {
        Self::Gst(Arc::new(buffer))
    }
}

impl std::ops::Deref for FramePixels {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Owned(bytes) => bytes,
            Self::Gst(mapped) => mapped.as_slice(),
        }
    }
}

impl std::fmt::Debug for FramePixels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Owned(_) => "owned",
            Self::Gst(_) => "gst",
        };
        f.debug_struct("FramePixels")
            .field("kind", &kind)
            .field("bytes", &self.len())
            .finish()
    }
}

impl From<Vec<u8>> for FramePixels {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Owned(bytes.into())
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Same size with width and height exchanged
    pub const fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Largest size with the same aspect ratio that fits in `bounds`.
    ///
    /// Never scales up. Dimensions are rounded down to even numbers, which most
    /// encoders and scalers require.
    pub fn fit_within(self, bounds: FrameSize) -> FrameSize {
        if self.is_empty() || (self.width <= bounds.width && self.height <= bounds.height) {
            return self;
        }
        let scale = f64::min(
            bounds.width as f64 / self.width as f64,
            bounds.height as f64 / self.height as f64,
        );
        let width = ((self.width as f64 * scale) as u32 & !1).max(2);
        let height = ((self.height as f64 * scale) as u32 & !1).max(2);
        FrameSize { width, height }
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Clockwise mounting rotation of the sensor, in quarter turns
///
/// A sideways mount (90° or 270°) means the natural frame is the transposed
/// buffer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SensorRotation {
    #[default]
    None = 0,
    Rotate90 = 1,
    Rotate180 = 2,
    Rotate270 = 3,
}

impl SensorRotation {
    const QUARTER_TURNS: [Self; 4] = [Self::None, Self::Rotate90, Self::Rotate180, Self::Rotate270];

    /// Rotation for a degree value, normalised into 0..360.
    ///
    /// Angles that are not a multiple of 90 fall back to no rotation.
    pub fn from_degrees(degrees: i32) -> Self {
        let normalised = degrees.rem_euclid(360);
        if normalised % 90 != 0 {
            return Self::None;
        }
        Self::QUARTER_TURNS[(normalised / 90) as usize]
    }

    pub fn quarter_turns(self) -> u32 {
        self as u32
    }

    pub fn degrees(self) -> u32 {
        self.quarter_turns() * 90
    }

    /// 90° and 270° mounts exchange width and height
    pub fn is_sideways(self) -> bool {
        self.quarter_turns() % 2 == 1
    }

    /// Texture-coordinate transform that undoes this rotation.
    ///
    /// Rotates texture coordinates about the texture centre so the sampled image
    /// appears upright in the natural frame orientation.
    pub fn texture_transform(self) -> Mat4 {
        // (cos, sin) of the rotation, exact for quarter turns
        let (cos, sin) = match self {
            SensorRotation::None => return IDENTITY_TRANSFORM,
            SensorRotation::Rotate90 => (0.0, 1.0),
            SensorRotation::Rotate180 => (-1.0, 0.0),
            SensorRotation::Rotate270 => (0.0, -1.0),
        };
        let tx = 0.5 - (cos * 0.5 - sin * 0.5);
        let ty = 0.5 - (sin * 0.5 + cos * 0.5);
        [
            cos, sin, 0.0, 0.0, //
            -sin, cos, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            tx, ty, 0.0, 1.0,
        ]
    }
}

impl std::fmt::Display for SensorRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Geometry of the capture stream, resolved once per camera configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformationInfo {
    /// Size of the crop rectangle in buffer orientation
    pub crop: FrameSize,
    /// Mounting rotation of the sensor
    pub rotation: SensorRotation,
}

impl TransformationInfo {
    /// Frame size as it should be displayed and recorded.
    ///
    /// Width and height are exchanged for 90° and 270° rotations.
    pub fn natural_size(&self) -> FrameSize {
        if self.rotation.is_sideways() {
            self.crop.transposed()
        } else {
            self.crop
        }
    }
}

/// One captured RGBA frame
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA pixels, `stride` bytes per row
    pub data: FramePixels,
    /// Row stride in bytes (may include padding)
    pub stride: u32,
    /// Texture-coordinate transform (crop/rotation correction)
    pub transform: Mat4,
    /// Capture timestamp in nanoseconds, monotonic within one stream
    pub timestamp_ns: i64,
}

impl CameraFrame {
    /// Build a tightly packed RGBA frame
    pub fn from_rgba(width: u32, height: u32, data: impl Into<FramePixels>, timestamp_ns: i64) -> Self {
        Self {
            width,
            height,
            data: data.into(),
            stride: width * 4,
            transform: IDENTITY_TRANSFORM,
            timestamp_ns,
        }
    }

    /// Replace the texture transform
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Why a frame source could not be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The source kind cannot run here (no PipeWire, no geometry yet)
    NotAvailable(String),
    DeviceNotFound(String),
    /// The capture pipeline could not be built or started
    Pipeline(String),
    /// Negotiated caps are not RGBA
    FormatNotSupported(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAvailable(msg) => write!(f, "Frame source unavailable: {}", msg),
            Self::DeviceNotFound(device) => write!(f, "No camera at {}", device),
            Self::Pipeline(msg) => write!(f, "Capture pipeline failed: {}", msg),
            Self::FormatNotSupported(caps) => write!(f, "Unsupported capture format: {}", caps),
        }
    }
}

impl std::error::Error for BackendError {}
