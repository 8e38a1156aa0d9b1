// SPDX-License-Identifier: MPL-2.0

//! Watermark opacity over time

use crate::constants::watermark as defaults;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// How the watermark opacity changes with elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatermarkAnimation {
    /// Fades in and out twice per period, peaking at `amplitude`
    Pulse { frequency_hz: f32, amplitude: f32 },
    /// Mostly opaque, dipping by `intensity` twice per period
    Blink { period_ms: f32, intensity: f32 },
}

impl Default for WatermarkAnimation {
    fn default() -> Self {
        Self::pulse()
    }
}

impl WatermarkAnimation {
    /// Pulse with the default frequency and amplitude
    pub const fn pulse() -> Self {
        Self::Pulse {
            frequency_hz: defaults::PULSE_FREQUENCY_HZ,
            amplitude: defaults::PULSE_AMPLITUDE,
        }
    }

    /// Blink with the default period and intensity
    pub const fn blink() -> Self {
        Self::Blink {
            period_ms: defaults::BLINK_PERIOD_MS,
            intensity: defaults::BLINK_INTENSITY,
        }
    }

    /// Opacity after `elapsed_ms`, always within [0, 1]
    pub fn alpha(&self, elapsed_ms: u64) -> f32 {
        let alpha = match *self {
            Self::Pulse {
                frequency_hz,
                amplitude,
            } => {
                if frequency_hz > 0.0 && frequency_hz.is_finite() {
                    amplitude * half_wave(elapsed_ms, 1000.0 / frequency_hz)
                } else {
                    amplitude
                }
            }
            Self::Blink {
                period_ms,
                intensity,
            } => {
                if period_ms > 0.0 && period_ms.is_finite() {
                    1.0 - intensity * half_wave(elapsed_ms, period_ms)
                } else {
                    1.0
                }
            }
        };
        if alpha.is_nan() {
            return 0.0;
        }
        alpha.clamp(0.0, 1.0)
    }
}

/// `sin(progress * PI)` where progress runs 0..1 over each half period
fn half_wave(elapsed_ms: u64, period_ms: f32) -> f32 {
    let half = f64::from(period_ms) / 2.0;
    if half <= 0.0 {
        return 0.0;
    }
    let progress = (elapsed_ms as f64 % half) / half;
    (progress as f32 * PI).sin()
}
