// SPDX-License-Identifier: MPL-2.0

//! Output locations and watermark assets

use crate::constants::APP_NAME;
use crate::errors::{AppError, AppResult};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Side length of the built-in watermark
const BUILTIN_WATERMARK_SIZE: u32 = 256;

/// Default directory for recordings: `~/Videos/watercam`
pub fn default_video_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(APP_NAME)
}

/// Timestamped recording path inside `dir`
pub fn timestamped_video_path(dir: &Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("video_{}.mp4", timestamp))
}

/// Resolve where a recording goes and make sure its directory exists.
///
/// An explicit `output` wins; a directory gets a timestamped file name inside it.
pub fn prepare_output_path(output: Option<PathBuf>, output_dir: Option<&Path>) -> AppResult<PathBuf> {
    let path = match output {
        Some(path) if path.is_dir() => timestamped_video_path(&path),
        Some(path) => path,
        None => {
            let dir = output_dir.map_or_else(default_video_dir, Path::to_path_buf);
            timestamped_video_path(&dir)
        }
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
    }
    debug!(path = %path.display(), "Output path prepared");
    Ok(path)
}

/// Load a watermark image from disk as RGBA
pub fn load_watermark(path: &Path) -> AppResult<RgbaImage> {
    let image = image::open(path)
        .map_err(|e| AppError::Storage(format!("Failed to load {}: {}", path.display(), e)))?
        .to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(AppError::Storage(format!("{} is empty", path.display())));
    }
    info!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "Watermark loaded"
    );
    Ok(image)
}

/// Built-in watermark: a white ring with a diagonal bar, transparent elsewhere
pub fn builtin_watermark() -> RgbaImage {
    let size = BUILTIN_WATERMARK_SIZE;
    let centre = (size as f32 - 1.0) / 2.0;
    let outer = size as f32 * 0.45;
    let inner = size as f32 * 0.36;
    let bar = size as f32 * 0.05;

    RgbaImage::from_fn(size, size, |x, y| {
        let dx = x as f32 - centre;
        let dy = y as f32 - centre;
        let radius = (dx * dx + dy * dy).sqrt();
        let on_ring = radius <= outer && radius >= inner;
        let on_bar = radius < inner && (dx - dy).abs() / std::f32::consts::SQRT_2 <= bar;
        if on_ring || on_bar {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}
