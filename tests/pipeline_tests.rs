// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the compositor pipeline and recording sessions

mod common;

use common::{CodecOptions, GfxCall, Harness, MockFrameSource, WAIT, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use watercam::backends::camera::{FrameSize, SensorRotation};
use watercam::errors::{AppError, GraphicsError};
use watercam::pipelines::{CompositorOptions, CompositorPipeline, ManualClock, RecorderEvent};
use watercam::worker::WorkerExit;

const W: u32 = 64;
const H: u32 = 48;

fn recorded(events: &[RecorderEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, RecorderEvent::VideoRecorded { .. }))
        .count()
}

fn too_short(events: &[RecorderEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, RecorderEvent::RecordingTooShort { .. }))
        .count()
}

#[test]
fn test_bind_emits_ready_with_natural_and_view_size() {
    let mut h = Harness::new();
    h.bind(info(W, H, SensorRotation::Rotate90));

    let events = h.take_events();
    assert_eq!(
        events,
        vec![RecorderEvent::Ready {
            frame_size: FrameSize::new(H, W),
            view_size: FrameSize::new(H / 2, W / 2),
        }]
    );
    assert_eq!(h.source.state().starts, 1);
    assert_eq!(h.graphics.created_surfaces().len(), 1);
    assert!(h.graphics.calls().contains(&GfxCall::PrepareScene));
}

#[test]
fn test_frames_reach_preview_with_watermark() {
    let h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));

    h.clock.set(250);
    h.push_frame(W, H, 1_000_000);
    h.push_frame(W, H, 2_000_000);

    assert_eq!(h.preview.frames_received(), 2);
    let alphas = h.graphics.watermark_alphas();
    assert_eq!(alphas.len(), 2);
    // Idle: time counts from configuration, a quarter period in is the crest
    for alpha in alphas {
        assert!((alpha - 0.2).abs() < 1e-4, "alpha {}", alpha);
    }
    // Preview frames carry no explicit presentation time
    assert!(h.graphics.presentation_times().is_empty());
    assert!(h.graphics.state().violations.is_empty());
}

#[test]
fn test_burst_of_frames_composites_the_latest() {
    let h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));

    for ts in 1..=20 {
        h.source.push(common::frame(W, H, ts));
    }
    assert!(h.pipeline.wait_idle(WAIT));

    let uploads: Vec<i64> = h
        .graphics
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            GfxCall::UpdateTexture { timestamp_ns } => Some(timestamp_ns),
            _ => None,
        })
        .collect();
    assert!(!uploads.is_empty() && uploads.len() <= 20);
    assert_eq!(uploads.last(), Some(&20));
    assert!(uploads.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(h.preview.frames_received(), uploads.len() as u64);
}

#[test]
fn test_disabled_watermark_is_not_drawn() {
    let h = Harness::with(CodecOptions::default(), |options| {
        options.watermark_enabled = false;
    });
    h.bind(info(W, H, SensorRotation::None));
    h.push_frame(W, H, 1);
    assert!(h.graphics.watermark_alphas().is_empty());
    assert!(
        h.graphics
            .calls()
            .iter()
            .any(|c| matches!(c, GfxCall::DrawCamera { .. }))
    );
}

#[test]
fn test_start_before_bind_is_ignored() {
    let mut h = Harness::new();
    h.start_at(0);
    h.stop_at(5_000);

    assert!(h.encoder.spy.state().settings.is_empty());
    assert!(h.take_events().is_empty());
    assert!(h.graphics.created_surfaces().is_empty());
}

#[test]
fn test_short_recording_is_discarded() {
    let mut h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.take_events();

    h.start_at(0);
    h.push_frame(W, H, 10_000);
    h.stop_at(1_500);

    let events = h.take_events();
    assert_eq!(too_short(&events), 1);
    assert_eq!(recorded(&events), 0);
    assert!(events.contains(&RecorderEvent::RecordingTooShort {
        duration: Duration::from_millis(1_500)
    }));
    assert!(!h.output.exists());
}

#[test]
fn test_long_recording_is_kept() {
    let mut h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.take_events();

    h.start_at(0);
    for i in 0..5 {
        h.push_frame(W, H, 1_000_000 * i);
    }
    h.stop_at(2_500);

    let events = h.take_events();
    assert_eq!(
        events,
        vec![
            RecorderEvent::RecordingStarted {
                path: h.output.clone()
            },
            RecorderEvent::VideoRecorded {
                path: h.output.clone(),
                duration: Duration::from_millis(2_500),
            },
        ]
    );
    assert!(h.output.exists());

    let state = h.encoder.spy.state();
    assert!(state.muxer_stopped);
    assert_eq!(state.codecs_stopped, 1);
    assert_eq!(state.samples.len(), 5);
    assert_eq!(state.settings[0].width, W);
    assert_eq!(state.settings[0].height, H);
    assert_eq!(state.settings[0].bitrate_bps, 6_000_000);
}

#[test]
fn test_exactly_minimum_duration_is_too_short() {
    let mut h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.start_at(1_000);
    h.push_frame(W, H, 1);
    h.stop_at(3_000);

    let events = h.take_events();
    assert_eq!(too_short(&events), 1);
    assert!(!h.output.exists());
}

#[test]
fn test_consecutive_sessions_gate_independently() {
    let mut h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));

    h.start_at(0);
    h.push_frame(W, H, 1);
    h.stop_at(3_000);

    h.start_at(10_000);
    h.push_frame(W, H, 2);
    h.stop_at(11_000);

    let events = h.take_events();
    assert_eq!(recorded(&events), 1);
    assert_eq!(too_short(&events), 1);
    let order: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            RecorderEvent::VideoRecorded { .. } => Some(true),
            RecorderEvent::RecordingTooShort { .. } => Some(false),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![true, false]);
    assert_eq!(h.encoder.spy.state().settings.len(), 2);
}

#[test]
fn test_start_twice_keeps_one_session() {
    let mut h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.take_events();

    h.start_at(0);
    h.start_at(100);
    let started = h
        .take_events()
        .into_iter()
        .filter(|e| matches!(e, RecorderEvent::RecordingStarted { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(h.encoder.spy.state().settings.len(), 1);
}

#[test]
fn test_stop_while_idle_is_ignored() {
    let mut h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.take_events();
    h.stop_at(100);
    assert!(h.take_events().is_empty());
}

#[test]
fn test_presentation_times_never_decrease() {
    let h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.start_at(0);

    for ts in [5_000, 4_000, 9_000, 9_000, 7_000, 12_000] {
        h.push_frame(W, H, ts);
    }

    let times = h.graphics.presentation_times();
    assert_eq!(times, vec![5_000, 5_000, 9_000, 9_000, 9_000, 12_000]);
    let state = h.encoder.spy.state();
    let queued: Vec<i64> = state.frames_in.iter().map(|t| t.unwrap()).collect();
    assert_eq!(queued, times);
}

#[test]
fn test_recording_draws_encoder_at_frame_size() {
    let h = Harness::new();
    h.bind(info(W, H, SensorRotation::Rotate270));
    h.start_at(0);
    h.push_frame(W, H, 1);

    let surfaces = h.graphics.created_surfaces();
    assert_eq!(surfaces.len(), 2);
    let encoder_surface = surfaces[1];
    let calls = h.graphics.calls();
    let at = calls
        .iter()
        .position(|c| *c == GfxCall::MakeCurrent(encoder_surface))
        .unwrap();
    assert_eq!(calls[at + 1], GfxCall::SetViewport(FrameSize::new(H, W)));
    assert!(calls[at..].iter().any(|c| matches!(
        c,
        GfxCall::DrawWatermark { surface, .. } if *surface == encoder_surface
    )));
    assert!(calls[at..].contains(&GfxCall::SwapBuffers {
        surface: encoder_surface
    }));
}

#[test]
fn test_recording_watermark_timing_follows_session() {
    let h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.clock.set(10_000);
    h.pipeline.start();
    assert!(h.pipeline.wait_idle(WAIT));

    // Half a period after the session started the pulse is back at zero
    h.clock.set(10_500);
    h.push_frame(W, H, 1);
    let alphas = h.graphics.watermark_alphas();
    assert_eq!(alphas.len(), 2);
    assert!(alphas.iter().all(|a| a.abs() < 1e-4));
}

#[test]
fn test_stop_makes_preview_current_before_release() {
    let h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.start_at(0);
    h.push_frame(W, H, 1);
    h.stop_at(3_000);

    let surfaces = h.graphics.created_surfaces();
    let (preview, encoder) = (surfaces[0], surfaces[1]);
    let calls = h.graphics.calls();
    let released = calls
        .iter()
        .position(|c| *c == GfxCall::ReleaseSurface(encoder))
        .unwrap();
    let made_current = calls[..released]
        .iter()
        .rposition(|c| matches!(c, GfxCall::MakeCurrent(_)))
        .unwrap();
    assert_eq!(calls[made_current], GfxCall::MakeCurrent(preview));

    let state = h.graphics.state();
    assert_eq!(state.current, Some(preview));
    assert!(state.violations.is_empty());
}

#[test]
fn test_encoder_failure_to_configure_stays_idle() {
    let mut h = Harness::with(
        CodecOptions {
            fail_create: true,
            ..Default::default()
        },
        |_| {},
    );
    h.bind(info(W, H, SensorRotation::None));
    h.take_events();

    h.start_at(0);
    h.push_frame(W, H, 1);
    h.stop_at(5_000);

    let events = h.take_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], RecorderEvent::RecordingFailed { .. }));
    assert_eq!(h.graphics.created_surfaces().len(), 1);
}

#[test]
fn test_rejected_encoder_frame_fails_session() {
    let mut h = Harness::with(
        CodecOptions {
            reject_input: true,
            ..Default::default()
        },
        |_| {},
    );
    h.bind(info(W, H, SensorRotation::None));
    h.take_events();

    h.start_at(0);
    h.push_frame(W, H, 1);

    let events = h.take_events();
    assert!(matches!(
        events.last(),
        Some(RecorderEvent::RecordingFailed { .. })
    ));
    assert!(!h.output.exists());

    // Preview keeps running
    h.push_frame(W, H, 2);
    assert_eq!(h.preview.frames_received(), 2);
    assert_eq!(h.pipeline.destroy(), WorkerExit::Completed);
}

#[test]
fn test_bind_failures_are_reported() {
    let mut h = Harness::new();
    h.bind_source(Box::new(MockFrameSource::without_info(h.source.clone())));
    assert!(matches!(
        h.take_events().as_slice(),
        [RecorderEvent::ConfigurationFailed { .. }]
    ));

    h.bind_source(Box::new(MockFrameSource::failing_start(
        info(W, H, SensorRotation::None),
        h.source.clone(),
    )));
    assert!(matches!(
        h.take_events().as_slice(),
        [RecorderEvent::ConfigurationFailed { .. }]
    ));
    // The preview surface of the failed attempt was released
    let state = h.graphics.state();
    assert!(state.live.is_empty());
    drop(state);

    // Still unconfigured
    h.start_at(0);
    assert!(h.encoder.spy.state().settings.is_empty());
}

#[test]
fn test_rebind_stops_recording_and_replaces_preview() {
    let mut h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.start_at(0);
    h.push_frame(W, H, 1);

    h.clock.set(4_000);
    h.bind(info(32, 32, SensorRotation::None));

    let events = h.take_events();
    assert_eq!(recorded(&events), 1);
    assert!(matches!(
        events.last(),
        Some(RecorderEvent::Ready { frame_size, .. }) if *frame_size == FrameSize::new(32, 32)
    ));
    assert_eq!(h.source.state().stops, 1);
    assert_eq!(h.source.state().starts, 2);
    assert_eq!(h.graphics.state().live.len(), 1);
}

#[test]
fn test_destroy_releases_everything() {
    let mut h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.start_at(0);
    h.push_frame(W, H, 1);
    h.clock.set(3_000);

    assert_eq!(h.pipeline.destroy(), WorkerExit::Completed);
    // Second call is a no-op
    assert_eq!(h.pipeline.destroy(), WorkerExit::Completed);
    assert!(h.pipeline.is_destroyed());

    // An active recording is finished the normal way
    assert_eq!(recorded(&h.take_events()), 1);

    let state = h.graphics.state();
    assert!(state.context_released);
    assert!(state.live.is_empty());
    assert_eq!(state.current, None);
    assert!(state.violations.is_empty());
    assert_eq!(h.source.state().stops, 1);

    // Calls after destroy are ignored
    h.pipeline.start();
    assert!(!h.pipeline.wait_idle(Duration::from_millis(50)));
}

#[test]
fn test_destroy_during_frame_delivery() {
    let h = Harness::new();
    h.bind(info(W, H, SensorRotation::None));
    h.start_at(0);
    let handoff = h.source.state().handoff.clone().unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let source = h.source.clone();
    let camera_running = running.clone();
    let camera = std::thread::spawn(move || {
        let mut ts = 0;
        while camera_running.load(Ordering::SeqCst) {
            ts += 33_000_000;
            source.push(common::frame(W, H, ts));
            std::thread::sleep(Duration::from_millis(1));
        }
    });

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.pipeline.destroy(), WorkerExit::Completed);
    std::thread::sleep(Duration::from_millis(20));
    running.store(false, Ordering::SeqCst);
    camera.join().unwrap();

    let state = h.graphics.state();
    assert!(state.context_released);
    assert!(state.live.is_empty());
    assert_eq!(state.current, None);
    assert!(state.violations.is_empty());
    assert!(!handoff.has_listener());
}

#[test]
fn test_backend_creation_failure_is_returned() {
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let options = CompositorOptions::new(
        image::RgbaImage::new(1, 1),
        Arc::new(common::MockEncoderBackend::new(CodecOptions::default())),
        std::env::temp_dir().join("never.mp4"),
        Arc::new(ManualClock::new(0)),
        tx,
    );
    let result = CompositorPipeline::new(options, || {
        Err::<common::MockGraphics, _>(GraphicsError::AdapterNotFound("none".into()))
    });
    assert!(matches!(
        result,
        Err(AppError::Graphics(GraphicsError::AdapterNotFound(_)))
    ));
}
