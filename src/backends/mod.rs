// SPDX-License-Identifier: MPL-2.0

//! Frame sources and preview windows
//!
//! ```text
//! ┌──────────────────────┐   FrameHandoff   ┌──────────────────────┐
//! │ camera::FrameSource  │ ───────────────▶ │ CompositorPipeline   │
//! │ (GStreamer appsink)  │  latest frame +  │                      │
//! └──────────────────────┘  notification    └──────────┬───────────┘
//!                                                      │ RenderedFrame
//!                                           ┌──────────▼───────────┐
//!                                           │ preview::Snapshot-   │
//!                                           │ Window (NativeWindow)│
//!                                           └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: frame source trait, frame types and the GStreamer source
//! - [`preview`]: headless preview window

pub mod camera;
pub mod preview;

pub use preview::SnapshotWindow;
