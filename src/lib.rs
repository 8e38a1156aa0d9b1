// SPDX-License-Identifier: MPL-2.0

//! watercam - camera recorder with a GPU-composited, animated watermark
//!
//! One rendering context draws every camera frame twice: into the preview and, while
//! recording, into the input surface of an H.264 encoder whose output is muxed into
//! MP4.
//!
//! # Architecture
//!
//! - [`backends`]: frame sources and preview windows
//! - [`gpu`]: rendering context, render surfaces and textures
//! - [`shaders`]: camera and watermark compositing programs
//! - [`media`]: codec and muxer abstractions with their GStreamer implementation
//! - [`pipelines`]: the compositor, recording sessions and the encoder drain loop
//! - [`worker`]: serial executors that own thread-affine state
//! - [`config`]: user configuration
//! - [`storage`]: output paths and watermark assets
//!
//! # Example
//!
//! ```ignore
//! let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
//! let options = CompositorOptions::new(
//!     storage::builtin_watermark(),
//!     Arc::new(GstEncoderBackend),
//!     storage::prepare_output_path(None, None)?,
//!     Arc::new(SystemClock::new()),
//!     tx,
//! );
//! let pipeline = CompositorPipeline::with_wgpu(options)?;
//! pipeline.bind_camera(source, preview, |size| size);
//! pipeline.start();
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod media;
pub mod pipelines;
pub mod shaders;
pub mod storage;
pub mod worker;

pub use config::Config;
pub use pipelines::{CompositorOptions, CompositorPipeline, RecorderEvent};
