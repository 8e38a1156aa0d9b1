// SPDX-License-Identifier: GPL-3.0-only

//! Sampled textures: the streaming camera texture and the static watermark texture

use crate::backends::camera::{CameraFrame, FrameSize};
use crate::errors::{GraphicsError, GraphicsResult};
use tracing::debug;

/// Format of both sampled textures
const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Linear magnification, nearest minification, clamped to the edge
pub fn create_sampler(device: &wgpu::Device, label: &str) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn create_texture(device: &wgpu::Device, label: &str, size: FrameSize) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn extent(size: FrameSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn write_rgba(queue: &wgpu::Queue, texture: &wgpu::Texture, data: &[u8], stride: u32, size: FrameSize) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(stride),
            rows_per_image: Some(size.height),
        },
        extent(size),
    );
}

/// Bytes an RGBA upload of `size` with `stride` needs to read
fn required_len(size: FrameSize, stride: u32) -> usize {
    if size.is_empty() {
        return 0;
    }
    stride as usize * (size.height as usize - 1) + size.width as usize * 4
}

/// Texture holding the most recent camera frame
///
/// Rewritten in place on every frame. Reallocated only when the frame size changes,
/// which also bumps [`generation`](Self::generation) so bind groups can be rebuilt.
pub struct StreamingTexture {
    texture: Option<(wgpu::Texture, wgpu::TextureView)>,
    size: FrameSize,
    generation: u64,
}

impl StreamingTexture {
    pub fn new() -> Self {
        Self {
            texture: None,
            size: FrameSize::default(),
            generation: 0,
        }
    }

    /// Upload `frame`, reallocating the texture if its size changed
    pub fn update(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, frame: &CameraFrame) -> GraphicsResult<()> {
        let size = frame.size();
        if size.is_empty() || frame.stride < size.width * 4 {
            return Err(GraphicsError::Validation {
                op: "update_camera_texture".into(),
                message: format!("bad frame geometry {} stride {}", size, frame.stride),
            });
        }
        if frame.data.len() < required_len(size, frame.stride) {
            return Err(GraphicsError::Validation {
                op: "update_camera_texture".into(),
                message: format!(
                    "frame has {} bytes, {} needed",
                    frame.data.len(),
                    required_len(size, frame.stride)
                ),
            });
        }

        if self.texture.is_none() || self.size != size {
            debug!(old = %self.size, new = %size, "Reallocating camera texture");
            let texture = create_texture(device, "watercam camera texture", size);
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            if let Some((old, _)) = self.texture.replace((texture, view)) {
                old.destroy();
            }
            self.size = size;
            self.generation += 1;
        }

        if let Some((texture, _)) = &self.texture {
            write_rgba(queue, texture, &frame.data, frame.stride, size);
        }
        Ok(())
    }

    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.texture.as_ref().map(|(_, view)| view)
    }

    /// Changes whenever the underlying texture is reallocated
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Default for StreamingTexture {
    fn default() -> Self {
        Self::new()
    }
}

/// Texture uploaded once from an image
pub struct StaticTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl StaticTexture {
    pub fn from_image(device: &wgpu::Device, queue: &wgpu::Queue, image: &image::RgbaImage) -> Self {
        let size = FrameSize::new(image.width(), image.height());
        let texture = create_texture(device, "watercam watermark texture", size);
        write_rgba(queue, &texture, image.as_raw(), size.width * 4, size);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        debug!(%size, "Watermark texture uploaded");
        Self { texture, view }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

impl Drop for StaticTexture {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}
