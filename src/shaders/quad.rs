// SPDX-License-Identifier: GPL-3.0-only

//! Compositing programs
//!
//! Two render pipelines draw the composited frame: the camera quad covers the whole
//! viewport and replaces its contents, the overlay quad blends the watermark on top.
//! Each draw is recorded and submitted on its own so per-draw uniforms (transform,
//! opacity) written just before it are the ones it sees.

use super::{CAMERA_QUAD_SHADER, OVERLAY_QUAD_SHADER};
use crate::backends::camera::{FrameSize, Mat4};
use crate::constants::watermark::QUAD_EXTENT;
use crate::gpu::SURFACE_FORMAT;
use crate::gpu::texture::{StaticTexture, StreamingTexture, create_sampler};

/// Camera quad uniform (must match shader struct)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniforms {
    tex_transform: [[f32; 4]; 4],
}

/// Overlay quad uniform (must match shader struct)
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct OverlayUniforms {
    alpha: f32,
    extent: f32,
    _pad: [f32; 2],
}

fn to_columns(m: &Mat4) -> [[f32; 4]; 4] {
    [
        [m[0], m[1], m[2], m[3]],
        [m[4], m[5], m[6], m[7]],
        [m[8], m[9], m[10], m[11]],
        [m[12], m[13], m[14], m[15]],
    ]
}

/// Texture + sampler + uniform layout shared by both programs
fn create_bind_group_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

fn create_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
    uniforms: &wgpu::Buffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: uniforms.as_entire_binding(),
            },
        ],
    })
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    layout: &wgpu::BindGroupLayout,
    blend: Option<wgpu::BlendState>,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: SURFACE_FORMAT,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        multiview: None,
        cache: None,
    })
}

/// Record one four-vertex strip into `target` and submit it
#[allow(clippy::too_many_arguments)]
fn submit_quad(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    target: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
    viewport: FrameSize,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
) {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(label),
    });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_viewport(
            0.0,
            0.0,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..4, 0..1);
    }
    queue.submit(std::iter::once(encoder.finish()));
}

/// Full-bleed camera quad, no blending
pub struct CameraQuadProgram {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniforms: wgpu::Buffer,
    // Rebuilt when the streaming texture is reallocated
    bind_group: Option<(u64, wgpu::BindGroup)>,
}

impl CameraQuadProgram {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = create_bind_group_layout(device, "watercam camera quad layout");
        let pipeline = create_pipeline(
            device,
            "watercam camera quad",
            CAMERA_QUAD_SHADER,
            &layout,
            None,
        );
        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("watercam camera quad uniforms"),
            size: std::mem::size_of::<CameraUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            pipeline,
            layout,
            sampler: create_sampler(device, "watercam camera sampler"),
            uniforms,
            bind_group: None,
        }
    }

    /// Draw `texture` into `target`. Returns `false` when no frame was uploaded yet.
    pub fn draw(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target: &wgpu::TextureView,
        viewport: FrameSize,
        texture: &StreamingTexture,
        transform: &Mat4,
    ) -> bool {
        let Some(view) = texture.view() else {
            return false;
        };
        let generation = texture.generation();
        if self.bind_group.as_ref().map(|(g, _)| *g) != Some(generation) {
            let group = create_bind_group(
                device,
                "watercam camera quad bind group",
                &self.layout,
                view,
                &self.sampler,
                &self.uniforms,
            );
            self.bind_group = Some((generation, group));
        }
        let Some((_, bind_group)) = &self.bind_group else {
            return false;
        };

        let params = CameraUniforms {
            tex_transform: to_columns(transform),
        };
        queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&params));
        submit_quad(
            device,
            queue,
            "watercam camera quad",
            target,
            wgpu::LoadOp::Clear(wgpu::Color::BLACK),
            viewport,
            &self.pipeline,
            bind_group,
        );
        true
    }
}

/// Centered watermark quad, blended with One / OneMinusSrcAlpha
pub struct OverlayQuadProgram {
    pipeline: wgpu::RenderPipeline,
    uniforms: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    // Keeps the watermark alive as long as the bind group references it
    _texture: StaticTexture,
}

impl OverlayQuadProgram {
    pub fn new(device: &wgpu::Device, texture: StaticTexture) -> Self {
        let layout = create_bind_group_layout(device, "watercam overlay quad layout");
        let blend = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        };
        let pipeline = create_pipeline(
            device,
            "watercam overlay quad",
            OVERLAY_QUAD_SHADER,
            &layout,
            Some(blend),
        );
        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("watercam overlay quad uniforms"),
            size: std::mem::size_of::<OverlayUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sampler = create_sampler(device, "watercam overlay sampler");
        let bind_group = create_bind_group(
            device,
            "watercam overlay quad bind group",
            &layout,
            texture.view(),
            &sampler,
            &uniforms,
        );
        Self {
            pipeline,
            uniforms,
            bind_group,
            _texture: texture,
        }
    }

    pub fn draw(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        target: &wgpu::TextureView,
        viewport: FrameSize,
        alpha: f32,
    ) {
        let params = OverlayUniforms {
            alpha: alpha.clamp(0.0, 1.0),
            extent: QUAD_EXTENT,
            _pad: [0.0; 2],
        };
        queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&params));
        submit_quad(
            device,
            queue,
            "watercam overlay quad",
            target,
            wgpu::LoadOp::Load,
            viewport,
            &self.pipeline,
            &self.bind_group,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::IDENTITY_TRANSFORM;

    #[test]
    fn test_uniform_sizes_match_shader_layout() {
        assert_eq!(std::mem::size_of::<CameraUniforms>(), 64);
        assert_eq!(std::mem::size_of::<OverlayUniforms>(), 16);
    }

    #[test]
    fn test_columns_keep_translation_in_last_column() {
        let mut m = IDENTITY_TRANSFORM;
        m[12] = 0.25;
        m[13] = 0.75;
        let cols = to_columns(&m);
        assert_eq!(cols[3], [0.25, 0.75, 0.0, 1.0]);
        assert_eq!(cols[0], [1.0, 0.0, 0.0, 0.0]);
    }
}
