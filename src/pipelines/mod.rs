// SPDX-License-Identifier: MPL-2.0

//! Compositing and recording pipelines
//!
//! ```text
//! ┌──────────────┐     ┌─────────────────────┐     ┌──────────────┐
//! │ FrameSource  │ ──▶ │ CompositorPipeline  │ ──▶ │ Preview      │
//! │ (any thread) │     │ (watercam-render)   │     │ window       │
//! │              │     │ - camera quad       │     └──────────────┘
//! │              │     │ - watermark quad    │     ┌──────────────┐
//! │              │     │                     │ ──▶ │ VideoEncoder │ ──▶ MP4
//! └──────────────┘     └─────────────────────┘     │ (drain)      │
//!                                                   └──────────────┘
//! ```
//!
//! Camera notifications only enqueue work. Everything that touches the GPU runs on
//! the rendering worker, everything that touches the codec runs on the encoder's
//! drain worker.
//!
//! # Modules
//!
//! - [`compositor`]: the orchestrator and its public control surface
//! - [`session`]: recording state and the minimum duration policy
//! - [`watermark`]: watermark opacity over time
//! - [`clock`]: monotonic millisecond clock, injectable for tests
//! - [`video`]: encoder drain loop and muxing

pub mod clock;
pub mod compositor;
pub mod session;
pub mod video;
pub mod watermark;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compositor::{CompositorOptions, CompositorPipeline, RecorderEvent};
pub use session::{RecordingOutcome, RecordingSession};
pub use watermark::WatermarkAnimation;
