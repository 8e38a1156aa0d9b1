// SPDX-License-Identifier: GPL-3.0-only

//! Rendering context: one wgpu device plus the render surfaces bound to it
//!
//! Surfaces are offscreen `Rgba8Unorm` targets that can be copied out, so their
//! content reaches the window through a readback on every swap. Exactly one surface
//! is current at a time; draws always target the current one.

use super::{NativeWindow, RenderedFrame, SURFACE_FORMAT, SurfaceId, padded_bytes_per_row};
use crate::backends::camera::FrameSize;
use crate::errors::{GraphicsError, GraphicsResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Offscreen render target bound to one window
pub struct RenderSurface {
    window: Arc<dyn NativeWindow>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    staging: wgpu::Buffer,
    size: FrameSize,
    presentation_time_ns: Option<i64>,
}

impl RenderSurface {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }
}

struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

/// One rendering context and its surfaces
pub struct GraphicsContext {
    gpu: Option<Gpu>,
    surfaces: HashMap<SurfaceId, RenderSurface>,
    current: Option<SurfaceId>,
    next_id: u64,
}

impl GraphicsContext {
    /// Establish the rendering context.
    ///
    /// Blocks while the adapter and device are requested.
    pub fn new() -> GraphicsResult<Self> {
        let (device, queue, info) = pollster::block_on(super::create_render_device("watercam"))?;
        info!(adapter = %info.adapter_name, backend = ?info.backend, "Rendering context ready");

        Ok(Self {
            gpu: Some(Gpu { device, queue }),
            surfaces: HashMap::new(),
            current: None,
            next_id: 1,
        })
    }

    pub fn device(&self) -> GraphicsResult<&wgpu::Device> {
        self.gpu
            .as_ref()
            .map(|gpu| &gpu.device)
            .ok_or(GraphicsError::ContextReleased)
    }

    pub fn queue(&self) -> GraphicsResult<&wgpu::Queue> {
        self.gpu
            .as_ref()
            .map(|gpu| &gpu.queue)
            .ok_or(GraphicsError::ContextReleased)
    }

    /// Run `f` inside a validation error scope and report any error against `op`.
    pub fn checked<T>(
        &self,
        op: &str,
        f: impl FnOnce(&wgpu::Device, &wgpu::Queue) -> T,
    ) -> GraphicsResult<T> {
        let gpu = self.gpu.as_ref().ok_or(GraphicsError::ContextReleased)?;
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f(&gpu.device, &gpu.queue);
        match pollster::block_on(gpu.device.pop_error_scope()) {
            None => Ok(out),
            Some(e) => Err(GraphicsError::Validation {
                op: op.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Allocate an offscreen target sized to `window`
    pub fn create_surface(&mut self, window: Arc<dyn NativeWindow>) -> GraphicsResult<SurfaceId> {
        let size = window.size();
        if size.is_empty() {
            return Err(GraphicsError::SurfaceCreation(format!(
                "window has no area ({})",
                size
            )));
        }

        let (texture, staging) = self.checked("create_surface", |device, _| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("watercam render surface"),
                size: wgpu::Extent3d {
                    width: size.width,
                    height: size.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: SURFACE_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let staging = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("watercam surface readback"),
                size: (padded_bytes_per_row(size.width) * size.height) as u64,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            (texture, staging)
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        self.surfaces.insert(
            id,
            RenderSurface {
                window,
                texture,
                view,
                staging,
                size,
                presentation_time_ns: None,
            },
        );
        debug!(surface = %id, %size, "Render surface created");
        Ok(id)
    }

    pub fn make_current(&mut self, surface: SurfaceId) -> GraphicsResult<()> {
        if self.gpu.is_none() {
            return Err(GraphicsError::ContextReleased);
        }
        if !self.surfaces.contains_key(&surface) {
            return Err(GraphicsError::UnknownSurface);
        }
        self.current = Some(surface);
        Ok(())
    }

    /// Surface all draws currently go to
    pub fn current_target(&self) -> GraphicsResult<&RenderSurface> {
        self.current
            .and_then(|id| self.surfaces.get(&id))
            .ok_or(GraphicsError::NoCurrentSurface)
    }

    pub fn set_presentation_time(&mut self, surface: SurfaceId, time_ns: i64) -> GraphicsResult<()> {
        let target = self
            .surfaces
            .get_mut(&surface)
            .ok_or(GraphicsError::UnknownSurface)?;
        target.presentation_time_ns = Some(time_ns);
        Ok(())
    }

    /// Read the target back and queue it on its window
    pub fn swap_buffers(&mut self, surface: SurfaceId) -> GraphicsResult<()> {
        let target = self
            .surfaces
            .get(&surface)
            .ok_or(GraphicsError::UnknownSurface)?;
        let FrameSize { width, height } = target.size;
        let padded = padded_bytes_per_row(width);

        self.checked("swap_buffers", |device, queue| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("watercam swap"),
            });
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &target.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &target.staging,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
            queue.submit(std::iter::once(encoder.finish()));
        })?;

        let padded_data = pollster::block_on(super::read_buffer_async(self.device()?, &target.staging))
            .map_err(GraphicsError::Readback)?;

        let row = (width * 4) as usize;
        let data = if padded as usize == row {
            padded_data
        } else {
            let mut data = Vec::with_capacity(row * height as usize);
            for chunk in padded_data.chunks(padded as usize).take(height as usize) {
                data.extend_from_slice(&chunk[..row]);
            }
            data
        };

        let window = Arc::clone(&target.window);
        let presentation_time_ns = self
            .surfaces
            .get_mut(&surface)
            .and_then(|target| target.presentation_time_ns.take());

        trace!(surface = %surface, ?presentation_time_ns, "Swapping buffers");
        window
            .queue_frame(RenderedFrame {
                width,
                height,
                data,
                presentation_time_ns,
            })
            .map_err(GraphicsError::Present)
    }

    /// Destroy a surface; unbinds it first if it is current
    pub fn release_surface(&mut self, surface: SurfaceId) {
        if self.current == Some(surface) {
            self.current = None;
        }
        if let Some(target) = self.surfaces.remove(&surface) {
            target.texture.destroy();
            target.staging.destroy();
            debug!(surface = %surface, "Render surface released");
        }
    }

    /// Release all surfaces and the device
    pub fn release(&mut self) {
        let ids: Vec<SurfaceId> = self.surfaces.keys().copied().collect();
        if !ids.is_empty() {
            warn!(count = ids.len(), "Releasing context with live surfaces");
        }
        for id in ids {
            self.release_surface(id);
        }
        if self.gpu.take().is_some() {
            info!("Rendering context released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.gpu.is_none()
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        self.release();
    }
}
