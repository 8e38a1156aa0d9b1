// SPDX-License-Identifier: MPL-2.0

//! Frame sources and the frame handoff slot
//!
//! ```text
//! ┌─────────────────────┐
//! │  FrameSource        │  ← camera thread (GStreamer streaming thread, test driver)
//! └──────────┬──────────┘
//!            │ submit(frame)
//!            ▼
//! ┌─────────────────────┐
//! │  FrameHandoff       │  ← latest frame wins, one listener
//! └──────────┬──────────┘
//!            │ listener()
//!            ▼
//! ┌─────────────────────┐
//! │  Rendering worker   │  ← take_latest() + composite
//! └─────────────────────┘
//! ```

pub mod gst_source;
pub mod types;

pub use gst_source::{GstFrameSource, SourceKind};
pub use types::*;

use std::sync::{Arc, Mutex};

/// Producer of camera frames
///
/// Implementations deliver frames by calling [`FrameHandoff::submit`] from whatever
/// thread they capture on.
pub trait FrameSource: Send {
    /// Crop size and sensor rotation of the stream.
    ///
    /// Called once per configuration, before [`start`](Self::start).
    fn transformation_info(&self) -> BackendResult<TransformationInfo>;

    /// Begin delivering frames into `handoff`
    fn start(&mut self, handoff: FrameHandoff) -> BackendResult<()>;

    /// Stop delivering frames. Must tolerate being called when not started.
    fn stop(&mut self);
}

/// Callback run on the producer's thread after each submitted frame
pub type FrameListener = Arc<dyn Fn() + Send + Sync>;

/// Single-slot frame exchange between a producer thread and the rendering worker
///
/// Submitting overwrites any frame that was not consumed yet, so the consumer always
/// sees the most recent image. At most one listener is registered.
#[derive(Clone, Default)]
pub struct FrameHandoff {
    inner: Arc<HandoffInner>,
}

#[derive(Default)]
struct HandoffInner {
    slot: Mutex<Option<CameraFrame>>,
    listener: Mutex<Option<FrameListener>>,
}

impl FrameHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` as the latest one and notify the listener.
    ///
    /// The listener runs outside of any lock.
    pub fn submit(&self, frame: CameraFrame) {
        if let Ok(mut slot) = self.inner.slot.lock() {
            *slot = Some(frame);
        }
        let listener = self
            .inner
            .listener
            .lock()
            .ok()
            .and_then(|guard| guard.clone());
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Take the latest frame, leaving the slot empty
    pub fn take_latest(&self) -> Option<CameraFrame> {
        self.inner.slot.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Register the frame-available listener, replacing any previous one
    pub fn set_listener(&self, listener: FrameListener) {
        if let Ok(mut guard) = self.inner.listener.lock() {
            *guard = Some(listener);
        }
    }

    /// Detach the listener and drop any pending frame
    pub fn clear_listener(&self) {
        if let Ok(mut guard) = self.inner.listener.lock() {
            guard.take();
        }
        if let Ok(mut slot) = self.inner.slot.lock() {
            slot.take();
        }
    }

    pub fn has_listener(&self) -> bool {
        self.inner
            .listener
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}
