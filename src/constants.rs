// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Application name used for config and output directories
pub const APP_NAME: &str = "watercam";

/// Encoder defaults
pub mod encoder {
    /// Output MIME type of the encoder (H.264 elementary stream)
    pub const MIME_TYPE: &str = "video/avc";

    /// Target bitrate in bits per second
    pub const BITRATE_BPS: u32 = 6_000_000;

    /// Nominal frame rate. The camera cadence is not queried, 30 is the common case.
    pub const FRAME_RATE: u32 = 30;

    /// Interval between key frames in seconds
    pub const KEY_FRAME_INTERVAL_SECS: u32 = 1;
}

/// Recording session policy
pub mod recording {
    /// Clips not longer than this are discarded
    pub const MIN_DURATION_MS: u64 = 2_000;
}

/// Watermark defaults
pub mod watermark {
    /// Pulsing cycles per second
    pub const PULSE_FREQUENCY_HZ: f32 = 1.0;

    /// Opacity at the crest of a pulse
    pub const PULSE_AMPLITUDE: f32 = 0.2;

    /// Length of one blink cycle in milliseconds
    pub const BLINK_PERIOD_MS: f32 = 1_000.0;

    /// Opacity drop at the trough of a blink
    pub const BLINK_INTENSITY: f32 = 0.2;

    /// Half extent of the watermark quad in clip space
    pub const QUAD_EXTENT: f32 = 0.8;
}

/// Preview defaults
pub mod preview {
    /// Largest preview width produced by the default sizing policy
    pub const MAX_WIDTH: u32 = 1280;

    /// Largest preview height produced by the default sizing policy
    pub const MAX_HEIGHT: u32 = 720;
}

/// Workers
pub mod timing {
    use super::Duration;

    /// Bounded wait for a worker to finish its queue on shutdown
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

    /// How long a single codec poll waits during the final drain
    pub const FINAL_DRAIN_POLL: Duration = Duration::from_millis(10);

    /// Budget for draining the codec after end of input. Together with the muxer
    /// budget it stays below [`SHUTDOWN_TIMEOUT`].
    pub const FINAL_DRAIN_TIMEOUT: Duration = Duration::from_millis(1_000);

    /// How long the muxer waits for its end-of-stream to reach the file sink
    pub const MUXER_EOS_TIMEOUT: Duration = Duration::from_millis(800);
}

/// Get the application version string
pub fn app_version() -> &'static str {
    env!("GIT_VERSION")
}
