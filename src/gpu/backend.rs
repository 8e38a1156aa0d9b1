// SPDX-License-Identifier: GPL-3.0-only

//! wgpu implementation of [`GraphicsBackend`]

use super::context::GraphicsContext;
use super::texture::{StaticTexture, StreamingTexture};
use super::{GraphicsBackend, NativeWindow, SurfaceId};
use crate::backends::camera::{CameraFrame, FrameSize, Mat4};
use crate::errors::{GraphicsError, GraphicsResult};
use crate::shaders::{CameraQuadProgram, OverlayQuadProgram};
use std::sync::Arc;
use tracing::{debug, trace};

/// Rendering context plus the compositing scene drawn into it
pub struct WgpuBackend {
    context: GraphicsContext,
    camera_texture: StreamingTexture,
    camera_program: Option<CameraQuadProgram>,
    overlay_program: Option<OverlayQuadProgram>,
    viewport: FrameSize,
}

impl WgpuBackend {
    /// Create the rendering context. Must run on the thread that will use it.
    pub fn new() -> GraphicsResult<Self> {
        Ok(Self {
            context: GraphicsContext::new()?,
            camera_texture: StreamingTexture::new(),
            camera_program: None,
            overlay_program: None,
            viewport: FrameSize::default(),
        })
    }

    /// Viewport clamped to the current target
    fn effective_viewport(&self, target: FrameSize) -> FrameSize {
        if self.viewport.is_empty() {
            return target;
        }
        FrameSize::new(
            self.viewport.width.min(target.width),
            self.viewport.height.min(target.height),
        )
    }
}

impl GraphicsBackend for WgpuBackend {
    fn create_surface(&mut self, window: Arc<dyn NativeWindow>) -> GraphicsResult<SurfaceId> {
        self.context.create_surface(window)
    }

    fn make_current(&mut self, surface: SurfaceId) -> GraphicsResult<()> {
        self.context.make_current(surface)
    }

    fn set_presentation_time(&mut self, surface: SurfaceId, time_ns: i64) -> GraphicsResult<()> {
        self.context.set_presentation_time(surface, time_ns)
    }

    fn swap_buffers(&mut self, surface: SurfaceId) -> GraphicsResult<()> {
        self.context.swap_buffers(surface)
    }

    fn release_surface(&mut self, surface: SurfaceId) {
        self.context.release_surface(surface);
    }

    fn release(&mut self) {
        // Programs and textures reference the device; drop them first
        self.overlay_program = None;
        self.camera_program = None;
        self.camera_texture = StreamingTexture::new();
        self.context.release();
    }

    fn prepare_scene(&mut self, watermark: &image::RgbaImage) -> GraphicsResult<()> {
        let (camera, overlay) = self.context.checked("prepare_scene", |device, queue| {
            let camera = CameraQuadProgram::new(device);
            let texture = StaticTexture::from_image(device, queue, watermark);
            (camera, OverlayQuadProgram::new(device, texture))
        })?;
        self.camera_program = Some(camera);
        self.overlay_program = Some(overlay);
        debug!(
            watermark_width = watermark.width(),
            watermark_height = watermark.height(),
            "Compositing programs created"
        );
        Ok(())
    }

    fn update_camera_texture(&mut self, frame: &CameraFrame) -> GraphicsResult<()> {
        let texture = &mut self.camera_texture;
        self.context
            .checked("update_camera_texture", |device, queue| {
                texture.update(device, queue, frame)
            })?
    }

    fn set_viewport(&mut self, size: FrameSize) {
        self.viewport = size;
    }

    fn draw_camera(&mut self, transform: &Mat4) -> GraphicsResult<()> {
        let target = self.context.current_target()?;
        let viewport = self.effective_viewport(target.size());
        let program = self
            .camera_program
            .as_mut()
            .ok_or(GraphicsError::SceneNotPrepared)?;
        let texture = &self.camera_texture;

        let drawn = self.context.checked("draw_camera", |device, queue| {
            program.draw(device, queue, target.view(), viewport, texture, transform)
        })?;
        if !drawn {
            trace!("No camera frame uploaded yet");
        }
        Ok(())
    }

    fn draw_watermark(&mut self, alpha: f32) -> GraphicsResult<()> {
        let target = self.context.current_target()?;
        let viewport = self.effective_viewport(target.size());
        let program = self
            .overlay_program
            .as_ref()
            .ok_or(GraphicsError::SceneNotPrepared)?;

        self.context.checked("draw_watermark", |device, queue| {
            program.draw(device, queue, target.view(), viewport, alpha)
        })
    }
}
