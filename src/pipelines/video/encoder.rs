// SPDX-License-Identifier: MPL-2.0

//! Surface-input video encoder with an asynchronous drain loop
//!
//! The codec and the muxer live on a dedicated worker. [`VideoEncoder::process`]
//! only enqueues a drain pass, so the rendering thread never waits on the codec.
//! A pass polls the codec until it has nothing more to give:
//!
//! - the first output format change creates and starts the muxer;
//! - codec configuration buffers are never muxed, the track format carries them;
//! - every other buffer is written at the track index and released back.
//!
//! [`VideoEncoder::shutdown`] signals end of input, drains until end of stream, then
//! finalizes the file and releases the codec.

use crate::constants::timing;
use crate::errors::{self, EncoderError, EncoderResult};
use crate::gpu::NativeWindow;
use crate::media::{BufferInfo, Codec, DequeueResult, EncoderBackend, EncoderSettings, Muxer};
use crate::worker::{Worker, WorkerExit};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Name of the encoder drain thread
pub const DRAIN_THREAD_NAME: &str = "watercam-encoder";

/// Outcome of a completed encoder shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Media samples written to the muxer
    pub samples_written: u64,
    /// Whether the muxer was ever started
    pub muxer_started: bool,
    /// Whether the codec's end-of-stream buffer was seen
    pub reached_end_of_stream: bool,
}

/// State owned by the drain worker
struct DrainState {
    codec: Box<dyn Codec>,
    backend: Arc<dyn EncoderBackend>,
    output_path: PathBuf,
    muxer: Option<Box<dyn Muxer>>,
    track: usize,
    muxer_started: bool,
    samples_written: u64,
    reached_end_of_stream: bool,
    codec_stopped: bool,
}

impl DrainState {
    /// One non-blocking pass; any failure is fatal for the worker
    fn drain(&mut self) {
        if let Err(e) = self.drain_until(None) {
            errors::fatal("encoder drain", e);
        }
    }

    /// Poll until the codec has no output. With a deadline, keep waiting for the
    /// end-of-stream buffer until the deadline passes.
    ///
    /// Returns whether end of stream was reached.
    fn drain_until(&mut self, deadline: Option<Instant>) -> EncoderResult<bool> {
        let timeout = match deadline {
            Some(_) => timing::FINAL_DRAIN_POLL,
            None => Duration::ZERO,
        };
        loop {
            match self.codec.dequeue_output(timeout)? {
                DequeueResult::TryAgainLater => match deadline {
                    Some(deadline) if Instant::now() < deadline => continue,
                    _ => return Ok(false),
                },
                DequeueResult::OutputFormatChanged => self.on_format_changed()?,
                DequeueResult::Buffer { index, info } => {
                    if self.on_buffer(index, info)? {
                        self.reached_end_of_stream = true;
                        return Ok(true);
                    }
                }
            }
        }
    }

    fn on_format_changed(&mut self) -> EncoderResult<()> {
        if self.muxer_started {
            warn!("Encoder output format changed twice, ignoring");
            return Ok(());
        }
        let format = self
            .codec
            .output_format()
            .ok_or_else(|| EncoderError::Pipeline("Format change without a format".into()))?;
        info!(
            mime = %format.mime_type,
            width = format.width,
            height = format.height,
            "Encoder output format changed"
        );

        let mut muxer = self.backend.create_muxer(&self.output_path)?;
        self.track = muxer.add_track(&format)?;
        muxer.start()?;
        self.muxer = Some(muxer);
        self.muxer_started = true;
        Ok(())
    }

    /// Mux one buffer and release it. Returns whether it ended the stream.
    fn on_buffer(&mut self, index: usize, mut info: BufferInfo) -> EncoderResult<bool> {
        let Some(data) = self.codec.output_buffer(index) else {
            errors::fatal("encoder drain", EncoderError::MissingOutputBuffer(index));
        };

        if info.flags.codec_config {
            // Carried by the track format; not a sample
            debug!(bytes = info.size, "Ignoring codec config buffer");
            info.size = 0;
        }

        if info.size > 0 {
            if !self.muxer_started {
                errors::fatal("encoder drain", EncoderError::MuxerNotStarted);
            }
            let muxer = self.muxer.as_mut().ok_or(EncoderError::MuxerNotStarted)?;
            muxer.write_sample(self.track, data, &info)?;
            self.samples_written += 1;
            trace!(
                pts_us = info.presentation_time_us,
                bytes = info.size,
                key_frame = info.flags.key_frame,
                "Sample written"
            );
        }

        self.codec.release_output_buffer(index);
        Ok(info.flags.end_of_stream)
    }

    /// Final pass: end input, drain to end of stream, finalize the file, stop the codec
    fn finish(&mut self) -> EncoderResult<DrainReport> {
        if let Err(e) = self.codec.signal_end_of_input() {
            warn!(error = %e, "Failed to signal end of input, draining what is buffered");
        }

        let deadline = Instant::now() + timing::FINAL_DRAIN_TIMEOUT;
        let drained = self.drain_until(Some(deadline));
        if matches!(drained, Ok(false)) {
            warn!("Encoder did not reach end of stream before the deadline");
        }

        let finalized = match self.muxer.take() {
            Some(mut muxer) => muxer.stop(),
            None => Ok(()),
        };
        self.stop_codec();

        drained?;
        finalized?;
        Ok(self.report())
    }

    fn stop_codec(&mut self) {
        if !self.codec_stopped {
            self.codec_stopped = true;
            self.codec.stop();
        }
    }

    fn report(&self) -> DrainReport {
        DrainReport {
            samples_written: self.samples_written,
            muxer_started: self.muxer_started,
            reached_end_of_stream: self.reached_end_of_stream,
        }
    }
}

impl Drop for DrainState {
    fn drop(&mut self) {
        self.stop_codec();
    }
}

/// Encoder for one recording session
pub struct VideoEncoder {
    worker: Worker<DrainState>,
    input_surface: Arc<dyn NativeWindow>,
    output_path: PathBuf,
}

impl VideoEncoder {
    /// Create and start a codec for `settings`, writing to `output_path`.
    ///
    /// The muxer is created later, once the codec reports its output format.
    pub fn configure(
        backend: Arc<dyn EncoderBackend>,
        output_path: &Path,
        settings: EncoderSettings,
    ) -> EncoderResult<Self> {
        info!(
            path = %output_path.display(),
            width = settings.width,
            height = settings.height,
            bitrate = settings.bitrate_bps,
            fps = settings.frame_rate,
            "Configuring video encoder"
        );

        let codec = backend.create_codec(&settings)?;
        let input_surface = codec.input_surface();
        let state_path = output_path.to_path_buf();
        let worker = Worker::spawn(DRAIN_THREAD_NAME, move || {
            Ok::<_, EncoderError>(DrainState {
                codec,
                backend,
                output_path: state_path,
                muxer: None,
                track: 0,
                muxer_started: false,
                samples_written: 0,
                reached_end_of_stream: false,
                codec_stopped: false,
            })
        })?;

        Ok(Self {
            worker,
            input_surface,
            output_path: output_path.to_path_buf(),
        })
    }

    /// Window the rendering context draws encoder frames into
    pub fn input_surface(&self) -> Arc<dyn NativeWindow> {
        Arc::clone(&self.input_surface)
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Schedule a drain pass. Never blocks.
    pub fn process(&self) {
        if !self.worker.execute(DrainState::drain) {
            trace!("Drain pass rejected, encoder is shutting down");
        }
    }

    /// Finish the stream and release everything.
    ///
    /// Waits at most [`timing::SHUTDOWN_TIMEOUT`] for the drain worker.
    pub fn shutdown(self) -> EncoderResult<DrainReport> {
        info!(path = %self.output_path.display(), "Shutting down video encoder");

        let (tx, rx) = mpsc::sync_channel(1);
        let queued = self.worker.execute(move |state: &mut DrainState| {
            let _ = tx.send(state.finish());
        });
        self.worker.shutdown();

        let exit = self.worker.await_termination(timing::SHUTDOWN_TIMEOUT);
        match exit {
            WorkerExit::Completed if queued => match rx.try_recv() {
                Ok(Ok(report)) => {
                    info!(
                        samples = report.samples_written,
                        end_of_stream = report.reached_end_of_stream,
                        "Video encoder finished"
                    );
                    Ok(report)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(EncoderError::DrainWorkerFailed),
            },
            WorkerExit::Completed | WorkerExit::Panicked => Err(EncoderError::DrainWorkerFailed),
            WorkerExit::TimedOut => Err(EncoderError::Timeout),
        }
    }
}
