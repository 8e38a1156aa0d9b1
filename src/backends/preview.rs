// SPDX-License-Identifier: MPL-2.0

//! Headless preview window
//!
//! [`SnapshotWindow`] stands in for an on-screen preview when there is no UI. It keeps
//! the most recent composited frame and can write it out as a PNG.

use crate::backends::camera::FrameSize;
use crate::gpu::{NativeWindow, RenderedFrame};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Preview window that retains the latest frame
pub struct SnapshotWindow {
    size: Mutex<FrameSize>,
    latest: Mutex<Option<RenderedFrame>>,
    frames: AtomicU64,
}

impl SnapshotWindow {
    pub fn new(size: FrameSize) -> Self {
        Self {
            size: Mutex::new(size),
            latest: Mutex::new(None),
            frames: AtomicU64::new(0),
        }
    }

    /// Change the size used for the next render surface
    pub fn resize(&self, size: FrameSize) {
        if let Ok(mut guard) = self.size.lock() {
            debug!(from = %*guard, to = %size, "Preview window resized");
            *guard = size;
        }
    }

    /// Number of frames received so far
    pub fn frames_received(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Copy of the latest frame, if any arrived
    pub fn latest(&self) -> Option<RenderedFrame> {
        self.latest.lock().ok().and_then(|guard| guard.clone())
    }

    /// Latest frame as an image
    pub fn snapshot(&self) -> Option<RgbaImage> {
        let frame = self.latest()?;
        RgbaImage::from_raw(frame.width, frame.height, frame.data)
    }

    /// Write the latest frame as PNG. Returns `Ok(None)` when nothing was rendered yet.
    pub fn save_png(&self, path: &Path) -> Result<Option<PathBuf>, String> {
        let Some(image) = self.snapshot() else {
            return Ok(None);
        };
        image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| format!("Failed to save preview snapshot: {}", e))?;
        info!(path = %path.display(), "Preview snapshot saved");
        Ok(Some(path.to_path_buf()))
    }
}

impl NativeWindow for SnapshotWindow {
    fn size(&self) -> FrameSize {
        self.size.lock().map(|guard| *guard).unwrap_or_default()
    }

    fn queue_frame(&self, frame: RenderedFrame) -> Result<(), String> {
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.data.len() != expected {
            return Err(format!(
                "Frame of {}x{} carries {} bytes, expected {}",
                frame.width,
                frame.height,
                frame.data.len(),
                expected
            ));
        }
        let mut guard = self
            .latest
            .lock()
            .map_err(|_| "Preview window lock poisoned".to_string())?;
        *guard = Some(frame);
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
