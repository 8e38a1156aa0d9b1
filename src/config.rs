// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON in `$XDG_CONFIG_HOME/watercam/config.json`. Every field has a
//! default, so partial files and a missing file are both fine.

use crate::constants::{APP_NAME, encoder, preview, recording};
use crate::errors::{AppError, AppResult};
use crate::media::EncoderSettings;
use crate::pipelines::WatermarkAnimation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Watermark layer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// Draw the watermark at all
    pub enabled: bool,
    /// Opacity animation
    pub animation: WatermarkAnimation,
    /// PNG to use instead of the built-in mark
    pub image: Option<PathBuf>,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            animation: WatermarkAnimation::default(),
            image: None,
        }
    }
}

/// Encoder parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub bitrate_bps: u32,
    pub frame_rate: u32,
    pub key_frame_interval_secs: u32,
    /// GStreamer element name tried before the built-in priority list
    pub preferred_encoder: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            bitrate_bps: encoder::BITRATE_BPS,
            frame_rate: encoder::FRAME_RATE,
            key_frame_interval_secs: encoder::KEY_FRAME_INTERVAL_SECS,
            preferred_encoder: None,
        }
    }
}

impl EncoderConfig {
    /// Encoder settings for a frame size
    pub fn settings(&self, width: u32, height: u32) -> EncoderSettings {
        EncoderSettings {
            width,
            height,
            bitrate_bps: self.bitrate_bps,
            frame_rate: self.frame_rate,
            key_frame_interval_secs: self.key_frame_interval_secs,
            preferred_encoder: self.preferred_encoder.clone(),
        }
    }
}

/// Recording policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Clips not longer than this are discarded
    pub min_duration_ms: u64,
    /// Directory for recordings; the platform videos directory when unset
    pub output_dir: Option<PathBuf>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: recording::MIN_DURATION_MS,
            output_dir: None,
        }
    }
}

/// Preview sizing bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_width: preview::MAX_WIDTH,
            max_height: preview::MAX_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watermark: WatermarkConfig,
    pub encoder: EncoderConfig,
    pub recording: RecordingConfig,
    pub preview: PreviewConfig,
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    debug!("No config directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(AppError::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let config: Self = serde_json::from_str(&text)
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = self.to_json()?;
        std::fs::write(path, text)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> AppResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))
    }
}
