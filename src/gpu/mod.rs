// SPDX-License-Identifier: GPL-3.0-only

//! GPU rendering context and the backend trait the compositor drives.
//!
//! The compositor never touches wgpu directly. It talks to a [`GraphicsBackend`],
//! which is constructed on the rendering worker and stays there. [`WgpuBackend`] is
//! the real implementation; tests substitute their own.

pub mod backend;
pub mod context;
pub mod texture;

pub use backend::WgpuBackend;
pub use context::GraphicsContext;

use crate::backends::camera::{CameraFrame, FrameSize, Mat4};
use crate::errors::{GraphicsError, GraphicsResult};
use std::sync::Arc;
use tracing::info;

pub use wgpu;

/// Pixel format of every render surface
pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Handle to a render surface owned by one rendering context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// One composited frame handed to a window
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA pixels
    pub data: Vec<u8>,
    /// Explicit presentation time, when one was set for this swap
    pub presentation_time_ns: Option<i64>,
}

/// Consumer of rendered frames (preview widget, encoder input)
///
/// Implementations are called from the rendering worker and must not block for long.
pub trait NativeWindow: Send + Sync {
    /// Size the render target should have
    fn size(&self) -> FrameSize;

    /// Accept one rendered frame
    fn queue_frame(&self, frame: RenderedFrame) -> Result<(), String>;
}

/// Rendering operations used by the compositor
///
/// One implementation instance is one rendering context. It is created on, and only
/// used from, the rendering worker thread.
pub trait GraphicsBackend {
    /// Allocate a render surface for `window`
    fn create_surface(&mut self, window: Arc<dyn NativeWindow>) -> GraphicsResult<SurfaceId>;

    /// Bind `surface` as the target of subsequent draws
    fn make_current(&mut self, surface: SurfaceId) -> GraphicsResult<()>;

    /// Tag the next swap of `surface` with an explicit timestamp
    fn set_presentation_time(&mut self, surface: SurfaceId, time_ns: i64) -> GraphicsResult<()>;

    /// Deliver the rendered content of `surface` to its window
    fn swap_buffers(&mut self, surface: SurfaceId) -> GraphicsResult<()>;

    /// Destroy `surface`. Unknown or already released surfaces are ignored.
    fn release_surface(&mut self, surface: SurfaceId);

    /// Destroy every remaining resource of the context. Safe to call repeatedly.
    fn release(&mut self);

    /// Create the compositing programs and upload the watermark
    fn prepare_scene(&mut self, watermark: &image::RgbaImage) -> GraphicsResult<()>;

    /// Upload the latest camera frame into the streaming texture
    fn update_camera_texture(&mut self, frame: &CameraFrame) -> GraphicsResult<()>;

    /// Region of the current surface that subsequent draws cover
    fn set_viewport(&mut self, size: FrameSize);

    /// Draw the camera frame full-bleed, replacing the surface contents
    fn draw_camera(&mut self, transform: &Mat4) -> GraphicsResult<()>;

    /// Blend the watermark over the surface with the given opacity
    fn draw_watermark(&mut self, alpha: f32) -> GraphicsResult<()>;
}

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, GL)
    pub backend: wgpu::Backend,
}

/// Create a wgpu device and queue for rendering.
///
/// Prefers a high performance adapter. No presentation surface is needed since all
/// render targets are offscreen.
pub async fn create_render_device(
    label: &str,
) -> GraphicsResult<(wgpu::Device, wgpu::Queue, GpuDeviceInfo)> {
    info!(label, "Creating GPU device for rendering");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN | wgpu::Backends::GL,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| GraphicsError::AdapterNotFound(e.to_string()))?;

    let adapter_info = adapter.get_info();
    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for rendering"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                .using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| GraphicsError::DeviceCreation(e.to_string()))?;

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
    };

    Ok((device, queue, info))
}

/// Map a readback buffer, wait for the GPU, and copy out its contents.
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
) -> Result<Vec<u8>, String> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let _ = device.poll(wgpu::PollType::wait_indefinitely());

    receiver
        .await
        .map_err(|_| "Failed to receive buffer mapping".to_string())?
        .map_err(|e| format!("Failed to map buffer: {:?}", e))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

/// Row pitch for texture-to-buffer copies, aligned as wgpu requires
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}
