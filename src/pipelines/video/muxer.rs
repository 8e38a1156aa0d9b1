// SPDX-License-Identifier: MPL-2.0

//! MP4 muxing of an encoded H.264 stream
//!
//! ```text
//! appsrc (video/x-h264, avc, au) -> mp4mux -> filesink
//! ```
//!
//! The appsrc caps carry the codec data, so the muxer pipeline can only be built
//! once the encoder's output format is known.

use crate::constants::timing;
use crate::errors::{EncoderError, EncoderResult};
use crate::media::{BufferInfo, Muxer, OutputFormat};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Muxer that has been created but not started
struct Prepared {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
}

enum MuxerState {
    Created,
    TrackAdded(Prepared),
    Started(Prepared),
    Stopped,
}

/// MP4 writer implementing [`Muxer`], single video track
pub struct GstMp4Muxer {
    output_path: PathBuf,
    state: MuxerState,
    samples: u64,
}

impl GstMp4Muxer {
    pub fn new(output_path: &Path) -> EncoderResult<Self> {
        gst::init().map_err(|e| EncoderError::Muxer(e.to_string()))?;
        if output_path.to_str().is_none() {
            return Err(EncoderError::Muxer(format!(
                "Output path is not valid UTF-8: {}",
                output_path.display()
            )));
        }
        info!(path = %output_path.display(), "Creating muxer");
        Ok(Self {
            output_path: output_path.to_path_buf(),
            state: MuxerState::Created,
            samples: 0,
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn build(&self, format: &OutputFormat) -> EncoderResult<Prepared> {
        let make = |factory: &str| {
            gst::ElementFactory::make(factory)
                .build()
                .map_err(|e| EncoderError::Muxer(format!("Failed to create {}: {}", factory, e)))
        };

        let pipeline = gst::Pipeline::new();
        let appsrc = make("appsrc")?
            .downcast::<AppSrc>()
            .map_err(|_| EncoderError::Muxer("Failed to downcast to AppSrc".into()))?;
        let muxer = make("mp4mux")?;
        let filesink = make("filesink")?;

        let mut caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "avc")
            .field("alignment", "au")
            .field("width", format.width as i32)
            .field("height", format.height as i32)
            .field("framerate", gst::Fraction::new(format.frame_rate as i32, 1));
        if let Some(codec_data) = &format.codec_data {
            caps = caps.field("codec_data", gst::Buffer::from_slice(codec_data.clone()));
        }
        appsrc.set_caps(Some(&caps.build()));
        appsrc.set_format(gst::Format::Time);

        // Non-streamable output gets duration and index written for seeking
        if muxer.has_property("streamable") {
            muxer.set_property("streamable", false);
        }
        filesink.set_property("location", self.output_path.to_string_lossy().to_string());

        pipeline
            .add_many([appsrc.upcast_ref(), &muxer, &filesink])
            .map_err(|e| EncoderError::Muxer(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many([appsrc.upcast_ref(), &muxer, &filesink])
            .map_err(|e| EncoderError::Muxer(format!("Failed to link elements: {}", e)))?;

        debug!(
            width = format.width,
            height = format.height,
            "Muxer pipeline built"
        );
        Ok(Prepared { pipeline, appsrc })
    }

    /// Wait for the file sink to see end-of-stream, or an error
    fn wait_for_eos(pipeline: &gst::Pipeline) -> EncoderResult<()> {
        let bus = pipeline
            .bus()
            .ok_or_else(|| EncoderError::Muxer("No bus available".into()))?;
        let timeout = gst::ClockTime::from_mseconds(timing::MUXER_EOS_TIMEOUT.as_millis() as u64);
        match bus.timed_pop_filtered(timeout, &[gst::MessageType::Eos, gst::MessageType::Error]) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(_) => Ok(()),
                gst::MessageView::Error(err) => {
                    error!(
                        error = %err.error(),
                        debug = ?err.debug(),
                        "GStreamer error while finalizing file"
                    );
                    Err(EncoderError::Muxer(err.error().to_string()))
                }
                _ => Ok(()),
            },
            None => {
                warn!(?timeout, "Muxer did not reach end-of-stream in time");
                Err(EncoderError::Timeout)
            }
        }
    }
}

/// Copy the sample range of `data` into a buffer stamped with the codec's timestamps
fn sample_buffer(data: &[u8], info: &BufferInfo) -> EncoderResult<gst::Buffer> {
    let payload = data
        .get(info.offset..info.offset + info.size)
        .ok_or_else(|| EncoderError::Muxer("Sample range outside buffer".into()))?;
    let mut buffer = gst::Buffer::from_slice(payload.to_vec());
    {
        let buffer_ref = buffer
            .get_mut()
            .ok_or_else(|| EncoderError::Muxer("Failed to get mutable buffer reference".into()))?;
        buffer_ref.set_pts(clock_time(info.presentation_time_us));
        // mp4mux derives composition offsets from PTS - DTS
        if let Some(dts) = info.decode_time_us {
            buffer_ref.set_dts(clock_time(dts));
        }
        if !info.flags.key_frame {
            buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
        }
    }
    Ok(buffer)
}

fn clock_time(us: i64) -> gst::ClockTime {
    gst::ClockTime::from_useconds(us.max(0) as u64)
}

impl Muxer for GstMp4Muxer {
    fn add_track(&mut self, format: &OutputFormat) -> EncoderResult<usize> {
        match self.state {
            MuxerState::Created => {
                self.state = MuxerState::TrackAdded(self.build(format)?);
                Ok(0)
            }
            _ => Err(EncoderError::Muxer("Only one track is supported".into())),
        }
    }

    fn start(&mut self) -> EncoderResult<()> {
        let MuxerState::TrackAdded(prepared) = std::mem::replace(&mut self.state, MuxerState::Stopped)
        else {
            return Err(EncoderError::Muxer("Muxer started without a track".into()));
        };
        prepared
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncoderError::Muxer(format!("Failed to start muxer: {}", e)))?;
        info!(path = %self.output_path.display(), "Muxer started");
        self.state = MuxerState::Started(prepared);
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> EncoderResult<()> {
        let MuxerState::Started(prepared) = &self.state else {
            return Err(EncoderError::MuxerNotStarted);
        };
        if track != 0 {
            return Err(EncoderError::Muxer(format!("Unknown track {}", track)));
        }

        let buffer = sample_buffer(data, info)?;
        prepared
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| EncoderError::Muxer(format!("Failed to push sample: {:?}", e)))?;
        self.samples += 1;
        Ok(())
    }

    fn stop(&mut self) -> EncoderResult<()> {
        let state = std::mem::replace(&mut self.state, MuxerState::Stopped);
        let prepared = match state {
            MuxerState::Started(prepared) => prepared,
            MuxerState::TrackAdded(prepared) => {
                let _ = prepared.pipeline.set_state(gst::State::Null);
                return Ok(());
            }
            MuxerState::Created | MuxerState::Stopped => return Ok(()),
        };

        info!(samples = self.samples, "Finalizing MP4 file");
        if let Err(e) = prepared.appsrc.end_of_stream() {
            warn!(error = ?e, "Failed to send EOS to muxer");
        }
        let finished = Self::wait_for_eos(&prepared.pipeline);

        prepared
            .pipeline
            .set_state(gst::State::Null)
            .map_err(|e| EncoderError::Muxer(format!("Failed to stop muxer: {}", e)))?;
        finished?;

        info!(path = %self.output_path.display(), "Recording saved");
        Ok(())
    }
}

impl Drop for GstMp4Muxer {
    fn drop(&mut self) {
        // Ensure pipeline is properly stopped to avoid GStreamer warnings
        match &self.state {
            MuxerState::TrackAdded(p) | MuxerState::Started(p) => {
                let _ = p.pipeline.set_state(gst::State::Null);
            }
            _ => {}
        }
    }
}
