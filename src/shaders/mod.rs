// SPDX-License-Identifier: GPL-3.0-only
//! Compositing shaders
//!
//! Both programs draw a four-vertex triangle strip generated in the vertex shader,
//! so no vertex buffers are involved.

mod quad;

pub use quad::{CameraQuadProgram, OverlayQuadProgram};

/// Camera quad: full-bleed, texture coordinates through a per-frame transform
pub const CAMERA_QUAD_SHADER: &str = include_str!("camera_quad.wgsl");

/// Watermark quad: centered, discards transparent texels, per-draw opacity
pub const OVERLAY_QUAD_SHADER: &str = include_str!("overlay_quad.wgsl");

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_shader(name: &str, source: &str) {
        let result = naga::front::wgsl::parse_str(source);
        match result {
            Ok(module) => {
                let info = naga::valid::Validator::new(
                    naga::valid::ValidationFlags::all(),
                    naga::valid::Capabilities::all(),
                )
                .validate(&module);

                if let Err(e) = info {
                    panic!("Shader '{}' validation failed: {:?}", name, e);
                }
            }
            Err(e) => {
                panic!("Shader '{}' parse failed: {:?}", name, e);
            }
        }
    }

    #[test]
    fn test_camera_quad_shader_validates() {
        validate_shader("camera_quad", CAMERA_QUAD_SHADER);
    }

    #[test]
    fn test_overlay_quad_shader_validates() {
        validate_shader("overlay_quad", OVERLAY_QUAD_SHADER);
    }

    #[test]
    fn test_shaders_share_entry_points() {
        for source in [CAMERA_QUAD_SHADER, OVERLAY_QUAD_SHADER] {
            assert!(source.contains("fn vs_main"));
            assert!(source.contains("fn fs_main"));
        }
    }

    #[test]
    fn test_overlay_discards_transparent_texels() {
        assert!(OVERLAY_QUAD_SHADER.contains("discard"));
        assert!(!CAMERA_QUAD_SHADER.contains("discard"));
    }
}
