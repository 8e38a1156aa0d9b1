// SPDX-License-Identifier: MPL-2.0

//! Recording session state and the minimum duration policy
//!
//! The encoder and its surface exist exactly while a session is
//! [`Recording`](RecordingSession::Recording); the enum makes any other combination
//! unrepresentable. Clips that are not strictly longer than the minimum duration are
//! deleted rather than reported.

use super::video::{DrainReport, VideoEncoder};
use crate::errors::EncoderError;
use crate::gpu::SurfaceId;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A session that is currently recording
pub struct ActiveRecording {
    started_at_ms: u64,
    encoder: VideoEncoder,
    surface: SurfaceId,
    last_presentation_ns: Option<i64>,
}

impl ActiveRecording {
    pub fn new(started_at_ms: u64, encoder: VideoEncoder, surface: SurfaceId) -> Self {
        Self {
            started_at_ms,
            encoder,
            surface,
            last_presentation_ns: None,
        }
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    pub fn encoder(&self) -> &VideoEncoder {
        &self.encoder
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn output_path(&self) -> &Path {
        self.encoder.output_path()
    }

    /// Presentation time for a frame captured at `capture_ns`, never earlier than the
    /// previous frame of this session
    pub fn next_presentation_time(&mut self, capture_ns: i64) -> i64 {
        let pts = match self.last_presentation_ns {
            Some(last) if capture_ns < last => {
                debug!(capture_ns, last, "Capture timestamp went backwards, clamping");
                last
            }
            _ => capture_ns,
        };
        self.last_presentation_ns = Some(pts);
        pts
    }

    /// Shut the encoder down and apply the duration policy.
    ///
    /// The encoder surface must already be released by the caller.
    pub fn finish(self, now_ms: u64, min_duration_ms: u64) -> RecordingOutcome {
        let duration_ms = now_ms.saturating_sub(self.started_at_ms);
        let path = self.output_path().to_path_buf();
        let drained = self.encoder.shutdown();
        RecordingOutcome::decide(path, duration_ms, min_duration_ms, drained)
    }

    /// Shut the encoder down and delete whatever was written
    pub fn abandon(self) {
        let path = self.output_path().to_path_buf();
        if let Err(e) = self.encoder.shutdown() {
            warn!(error = %e, "Encoder failed while abandoning recording");
        }
        remove_partial(&path);
    }
}

/// Idle or recording
#[derive(Default)]
pub enum RecordingSession {
    #[default]
    Idle,
    Recording(ActiveRecording),
}

impl RecordingSession {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording(_))
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveRecording> {
        match self {
            Self::Recording(active) => Some(active),
            Self::Idle => None,
        }
    }

    /// Move to Idle, returning the session that was active
    pub fn take(&mut self) -> Option<ActiveRecording> {
        match std::mem::take(self) {
            Self::Recording(active) => Some(active),
            Self::Idle => None,
        }
    }
}

/// Result of stopping a session
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingOutcome {
    /// The file was finalized and kept
    Recorded {
        path: PathBuf,
        duration_ms: u64,
        report: DrainReport,
    },
    /// The clip was too short; the file was removed
    TooShort { duration_ms: u64 },
    /// The encoder failed; the file was removed
    Failed { reason: String },
}

impl RecordingOutcome {
    /// Whether a clip of `duration_ms` is kept
    pub fn meets_minimum(duration_ms: u64, min_duration_ms: u64) -> bool {
        duration_ms > min_duration_ms
    }

    fn decide(
        path: PathBuf,
        duration_ms: u64,
        min_duration_ms: u64,
        drained: Result<DrainReport, EncoderError>,
    ) -> Self {
        match drained {
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Encoder failed while stopping");
                remove_partial(&path);
                Self::Failed {
                    reason: e.to_string(),
                }
            }
            Ok(_) if !Self::meets_minimum(duration_ms, min_duration_ms) => {
                info!(duration_ms, min_duration_ms, "Recording too short, discarding");
                remove_partial(&path);
                Self::TooShort { duration_ms }
            }
            Ok(report) => {
                info!(
                    path = %path.display(),
                    duration_ms,
                    samples = report.samples_written,
                    "Recording finished"
                );
                Self::Recorded {
                    path,
                    duration_ms,
                    report,
                }
            }
        }
    }
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed partial recording"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, path = %path.display(), "Failed to remove partial recording"),
    }
}
