// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use watercam::constants::{encoder, recording, timing, watermark};
use watercam::media::EncoderSettings;

#[test]
fn test_encoder_defaults() {
    let settings = EncoderSettings::new(1920, 1080);
    assert_eq!(settings.bitrate_bps, encoder::BITRATE_BPS);
    assert_eq!(settings.frame_rate, encoder::FRAME_RATE);
    assert_eq!(settings.key_frame_interval_secs, encoder::KEY_FRAME_INTERVAL_SECS);
    assert_eq!(settings.key_frame_distance(), 30);
    assert_eq!(encoder::MIME_TYPE, "video/avc");
}

#[test]
fn test_minimum_duration() {
    assert_eq!(recording::MIN_DURATION_MS, 2_000);
}

#[test]
fn test_pulse_crest_is_a_valid_alpha() {
    assert!(watermark::PULSE_AMPLITUDE > 0.0 && watermark::PULSE_AMPLITUDE <= 1.0);
    assert!(watermark::BLINK_INTENSITY >= 0.0 && watermark::BLINK_INTENSITY <= 1.0);
}

#[test]
fn test_shutdown_budget_covers_final_drain() {
    // The drain and the muxer EOS wait both run inside one worker shutdown
    assert!(timing::FINAL_DRAIN_TIMEOUT + timing::MUXER_EOS_TIMEOUT < timing::SHUTDOWN_TIMEOUT);
    assert!(timing::FINAL_DRAIN_POLL < timing::FINAL_DRAIN_TIMEOUT);
}
