use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::Receiver;
use image::{Rgb, RgbImage};

use wafer_inspect::config::AppConfig;
use wafer_inspect::{
    CpuBackend, Detection, DetectionController, DetectionParams, DetectionWorker, Frame,
    FrameSource, PipelineError, ResultSink, RunOutcome, RunState, SharedDetector, SourceKind,
    SourceStats, StubBackend, WorkerConfig, WorkerEvent,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Source double that counts `close()` calls.
struct ScriptedSource {
    kind: SourceKind,
    /// `None` never exhausts (camera-like).
    frames: Option<u64>,
    fail_at: Option<u64>,
    produced: u64,
    closes: Arc<AtomicU32>,
}

impl ScriptedSource {
    fn new(kind: SourceKind, frames: Option<u64>, closes: Arc<AtomicU32>) -> Self {
        Self {
            kind,
            frames,
            fail_at: None,
            produced: 0,
            closes,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closes.load(Ordering::SeqCst) > 0 {
            return Ok(None);
        }
        if Some(self.produced) == self.fail_at {
            anyhow::bail!("device unplugged");
        }
        if let Some(limit) = self.frames {
            if self.produced >= limit {
                return Ok(None);
            }
        }
        let frame = Frame::new(vec![50u8; 8 * 6 * 3], 8, 6, self.produced)?;
        self.produced += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.produced,
            description: "scripted".to_string(),
        }
    }
}

fn stub_detector() -> SharedDetector {
    Arc::new(Mutex::new(StubBackend::new(vec![Detection::from_corners(
        "particle",
        0,
        0.8,
        (1.0, 1.0),
        (4.0, 4.0),
    )])))
}

fn spawn(
    source: ScriptedSource,
    detector: SharedDetector,
    interval: Duration,
) -> (wafer_inspect::RunHandle, Receiver<WorkerEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let worker = DetectionWorker::new(
        7,
        Box::new(source),
        detector,
        DetectionParams::default(),
        WorkerConfig {
            frame_interval: interval,
        },
        tx,
    );
    (worker.spawn().expect("spawn worker"), rx)
}

/// Collect events up to and including `Finished`.
fn collect_until_finished(rx: &Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.recv_timeout(EVENT_TIMEOUT) {
        let done = matches!(event, WorkerEvent::Finished(_));
        events.push(event);
        if done {
            break;
        }
    }
    events
}

fn frame_indices(events: &[WorkerEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            WorkerEvent::Frame(step) => Some(step.original.index),
            WorkerEvent::Finished(_) => None,
        })
        .collect()
}

fn finished_outcome(events: &[WorkerEvent]) -> Option<RunOutcome> {
    match events.last() {
        Some(WorkerEvent::Finished(summary)) => Some(summary.outcome.clone()),
        _ => None,
    }
}

fn controller_in(dir: &Path, interval: Duration) -> DetectionController {
    let mut config = AppConfig::default();
    config.results_dir = dir.join("results");
    config.frame_interval = interval;
    config.sources.camera_device_template = "stub://cam".to_string();
    config.sources.camera_width = 160;
    config.sources.camera_height = 120;
    let sink = ResultSink::with_buffers(&config.display);
    let detector: SharedDetector = Arc::new(Mutex::new(CpuBackend::default()));
    DetectionController::new(config, detector, sink)
}

fn write_wafer_with_two_defects(path: &Path) {
    let mut image = RgbImage::from_pixel(200, 150, Rgb([60, 64, 70]));
    for y in 30..50 {
        for x in 30..50 {
            image.put_pixel(x, y, Rgb([235, 215, 60]));
        }
    }
    for y in 110..115 {
        for x in 60..160 {
            image.put_pixel(x, y, Rgb([210, 70, 60]));
        }
    }
    image.save(path).expect("write wafer image");
}

// ----------------------------------------------------------------------------
// Source lifecycle
// ----------------------------------------------------------------------------

#[test]
fn source_is_closed_exactly_once_on_every_exit_path() {
    // Exhausted image and video.
    for (kind, frames) in [(SourceKind::Image, 1), (SourceKind::Video, 4)] {
        let closes = Arc::new(AtomicU32::new(0));
        let source = ScriptedSource::new(kind, Some(frames), closes.clone());
        let (handle, rx) = spawn(source, stub_detector(), Duration::from_millis(1));
        let events = collect_until_finished(&rx);
        handle.join();
        assert_eq!(finished_outcome(&events), Some(RunOutcome::Exhausted));
        assert_eq!(closes.load(Ordering::SeqCst), 1, "{:?}", kind);
    }

    // Stopped camera.
    let closes = Arc::new(AtomicU32::new(0));
    let source = ScriptedSource::new(SourceKind::Camera, None, closes.clone());
    let (handle, rx) = spawn(source, stub_detector(), Duration::from_millis(5));
    rx.recv_timeout(EVENT_TIMEOUT).expect("first frame");
    handle.stop();
    let events = collect_until_finished(&rx);
    assert_eq!(finished_outcome(&events), Some(RunOutcome::Stopped));
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // Source failure mid-run.
    let closes = Arc::new(AtomicU32::new(0));
    let mut source = ScriptedSource::new(SourceKind::Camera, None, closes.clone());
    source.fail_at = Some(2);
    let (handle, rx) = spawn(source, stub_detector(), Duration::from_millis(1));
    let events = collect_until_finished(&rx);
    handle.join();
    assert_eq!(frame_indices(&events), vec![0, 1]);
    assert!(matches!(
        finished_outcome(&events),
        Some(RunOutcome::Failed(PipelineError::SourceUnavailable(_)))
    ));
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // Detector failure.
    let closes = Arc::new(AtomicU32::new(0));
    let source = ScriptedSource::new(SourceKind::Video, Some(10), closes.clone());
    let detector: SharedDetector = Arc::new(Mutex::new(StubBackend::default().failing_after(3)));
    let (handle, rx) = spawn(source, detector, Duration::from_millis(1));
    let events = collect_until_finished(&rx);
    handle.join();
    assert_eq!(frame_indices(&events), vec![0, 1, 2]);
    assert!(matches!(
        finished_outcome(&events),
        Some(RunOutcome::Failed(PipelineError::DetectorFailure(_)))
    ));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_the_handle_stops_the_worker() {
    let closes = Arc::new(AtomicU32::new(0));
    let source = ScriptedSource::new(SourceKind::Camera, None, closes.clone());
    let (handle, rx) = spawn(source, stub_detector(), Duration::from_millis(5));
    rx.recv_timeout(EVENT_TIMEOUT).expect("first frame");
    drop(handle);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    let events = collect_until_finished(&rx);
    assert_eq!(finished_outcome(&events), Some(RunOutcome::Stopped));
}

// ----------------------------------------------------------------------------
// Worker semantics
// ----------------------------------------------------------------------------

#[test]
fn single_image_emits_once_without_sleeping() {
    let closes = Arc::new(AtomicU32::new(0));
    let source = ScriptedSource::new(SourceKind::Image, Some(1), closes.clone());
    let started = Instant::now();
    // A long interval would be visible if the image run slept.
    let (handle, rx) = spawn(source, stub_detector(), Duration::from_secs(5));
    let events = collect_until_finished(&rx);
    handle.join();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(events.len(), 2);
    assert_eq!(frame_indices(&events), vec![0]);
    assert_eq!(finished_outcome(&events), Some(RunOutcome::Exhausted));
}

#[test]
fn video_emits_k_frames_in_source_order() {
    let closes = Arc::new(AtomicU32::new(0));
    let source = ScriptedSource::new(SourceKind::Video, Some(6), closes.clone());
    let (handle, rx) = spawn(source, stub_detector(), Duration::from_millis(1));
    let events = collect_until_finished(&rx);
    handle.join();

    assert_eq!(frame_indices(&events), vec![0, 1, 2, 3, 4, 5]);
    match events.last() {
        Some(WorkerEvent::Finished(summary)) => {
            assert_eq!(summary.frames_emitted, 6);
            assert_eq!(summary.kind, SourceKind::Video);
        }
        other => panic!("expected Finished, got {:?}", other),
    }
}

#[test]
fn stop_is_observed_within_one_interval() {
    let closes = Arc::new(AtomicU32::new(0));
    let source = ScriptedSource::new(SourceKind::Camera, None, closes.clone());
    let interval = Duration::from_millis(300);
    let (handle, rx) = spawn(source, stub_detector(), interval);
    rx.recv_timeout(EVENT_TIMEOUT).expect("first frame");

    let requested = Instant::now();
    handle.stop();
    assert!(requested.elapsed() < interval);

    let events = collect_until_finished(&rx);
    assert!(frame_indices(&events).is_empty());
    assert_eq!(finished_outcome(&events), Some(RunOutcome::Stopped));
    assert!(rx.try_recv().is_err());
}

#[test]
fn camera_stopped_after_third_frame_delivers_exactly_three() {
    let closes = Arc::new(AtomicU32::new(0));
    let source = ScriptedSource::new(SourceKind::Camera, None, closes.clone());
    let (handle, rx) = spawn(source, stub_detector(), Duration::from_millis(200));

    let mut delivered = Vec::new();
    while delivered.len() < 3 {
        match rx.recv_timeout(EVENT_TIMEOUT).expect("frame event") {
            WorkerEvent::Frame(step) => delivered.push(step.original.index),
            WorkerEvent::Finished(summary) => panic!("finished early: {:?}", summary),
        }
    }
    handle.stop();
    let rest = collect_until_finished(&rx);

    assert_eq!(delivered, vec![0, 1, 2]);
    assert!(frame_indices(&rest).is_empty());
    match rest.last() {
        Some(WorkerEvent::Finished(summary)) => {
            assert_eq!(summary.outcome, RunOutcome::Stopped);
            assert_eq!(summary.frames_emitted, 3);
        }
        other => panic!("expected Finished, got {:?}", other),
    }
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

#[test]
fn image_with_two_defects_fills_table_with_two_rows() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("wafer.png");
    write_wafer_with_two_defects(&image);

    let mut ctl = controller_in(dir.path(), Duration::from_millis(33));
    ctl.start(SourceKind::Image, &image.to_string_lossy(), 0.25, 0.45)
        .unwrap();
    let summary = ctl.wait_for_finish(EVENT_TIMEOUT).expect("run finishes");

    assert_eq!(summary.outcome, RunOutcome::Exhausted);
    assert_eq!(summary.frames_emitted, 1);
    assert_eq!(ctl.sink().stats().frames_handled, 1);
    let rows = ctl.sink().table().rows();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.confidence >= 0.25));
    let mut labels: Vec<&str> = rows.iter().map(|row| row.label.as_str()).collect();
    labels.sort();
    assert_eq!(labels, vec!["particle", "scratch"]);
    assert_eq!(ctl.run_state(), RunState::Finished);

    let saved = ctl.save_last_result().unwrap();
    let name = saved.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("result_"), "{}", name);
    assert!(saved.is_file());
}

#[test]
fn concurrent_start_is_rejected_without_touching_active_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctl = controller_in(dir.path(), Duration::from_millis(20));
    let run_id = ctl.start(SourceKind::Camera, "0", 0.3, 0.5).unwrap();

    for (kind, source) in [
        (SourceKind::Camera, "1"),
        (SourceKind::Video, "stub://clip"),
        (SourceKind::Image, "missing.png"),
    ] {
        assert_eq!(
            ctl.start(kind, source, 0.9, 0.9),
            Err(PipelineError::ConcurrentRunRejected)
        );
    }
    assert!(ctl.is_running());
    assert_eq!(ctl.params().confidence(), 0.3);
    assert_eq!(ctl.params().iou(), 0.5);

    let summary = ctl.stop().expect("active run");
    assert_eq!(summary.run_id, run_id);
    assert_eq!(summary.outcome, RunOutcome::Stopped);
    assert!(!ctl.is_running());
    assert!(ctl.stop().is_none());
}

#[test]
fn video_run_recording_and_snapshot_naming_while_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctl = controller_in(dir.path(), Duration::from_millis(5));
    ctl.start(SourceKind::Video, "stub://line?frames=5", 0.25, 0.45)
        .unwrap();
    let summary = ctl.wait_for_finish(EVENT_TIMEOUT).expect("run finishes");

    assert_eq!(summary.frames_emitted, 5);
    assert!(ctl.status().contains("video detection finished"));
    #[cfg(feature = "video-ffmpeg")]
    {
        assert_eq!(ctl.sink().stats().frames_recorded, 5);
        let video = ctl.last_saved_video().expect("recorded video").clone();
        assert!(video.is_file());
        assert_eq!(video.extension().and_then(|e| e.to_str()), Some("mp4"));
    }
    // Without an encoder the run still completes, just unrecorded.
    #[cfg(not(feature = "video-ffmpeg"))]
    {
        assert_eq!(ctl.sink().stats().frames_recorded, 0);
        assert_eq!(ctl.sink().stats().write_failures, 0);
        assert!(ctl.last_saved_video().is_none());
    }

    // Snapshot naming while a stream run is active.
    ctl.start(SourceKind::Camera, "0", 0.25, 0.45).unwrap();
    assert!(ctl.pump_events_timeout(EVENT_TIMEOUT) > 0);
    let snapshot = ctl.save_last_result().unwrap();
    let name = snapshot.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("snapshot_"), "{}", name);
    ctl.stop();
    assert_eq!(ctl.status(), "detection stopped");
}

#[test]
fn unusable_results_dir_does_not_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    // A plain file where the results directory should be.
    std::fs::write(dir.path().join("results"), b"not a dir").unwrap();

    let mut ctl = controller_in(dir.path(), Duration::from_millis(5));
    ctl.start(SourceKind::Video, "stub://line?frames=3", 0.25, 0.45)
        .unwrap();
    let summary = ctl.wait_for_finish(EVENT_TIMEOUT).expect("run finishes");

    assert_eq!(summary.outcome, RunOutcome::Exhausted);
    assert_eq!(ctl.sink().stats().frames_handled, 3);
    assert!(ctl.last_saved_video().is_none());
    assert!(matches!(
        ctl.save_last_result(),
        Err(PipelineError::OutputWriteFailure(_))
    ));
}

#[test]
fn unsupported_and_missing_sources_never_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctl = controller_in(dir.path(), Duration::from_millis(5));
    assert!(matches!(
        ctl.start(SourceKind::Image, "notes.txt", 0.25, 0.45),
        Err(PipelineError::UnsupportedSource(_))
    ));
    assert!(matches!(
        ctl.start(SourceKind::Video, "/nonexistent/clip.mp4", 0.25, 0.45),
        Err(PipelineError::SourceUnavailable(_))
    ));
    assert!(!ctl.is_running());
    assert_eq!(ctl.run_state(), RunState::Idle);
}

#[test]
fn corrupt_image_starts_and_fails_on_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"not a png").unwrap();

    let mut ctl = controller_in(dir.path(), Duration::from_millis(5));
    ctl.start(SourceKind::Image, &path.to_string_lossy(), 0.25, 0.45)
        .unwrap();
    let summary = ctl.wait_for_finish(EVENT_TIMEOUT).expect("run finishes");

    assert!(matches!(
        summary.outcome,
        RunOutcome::Failed(PipelineError::SourceUnavailable(_))
    ));
    assert_eq!(summary.frames_emitted, 0);
    assert_eq!(ctl.sink().stats().frames_handled, 0);
    assert!(!ctl.is_running());
    assert!(matches!(
        ctl.save_last_result(),
        Err(PipelineError::NoResultAvailable)
    ));
}

#[test]
fn threshold_setters_clamp_every_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctl = controller_in(dir.path(), Duration::from_millis(5));
    for value in [-10.0f32, -0.0, 0.0, 0.25, 0.999, 1.0, 1.0001, 42.0, f32::INFINITY] {
        let confidence = ctl.set_confidence(value);
        let iou = ctl.set_iou(value);
        assert!((0.0..=1.0).contains(&confidence), "{}", value);
        assert!((0.0..=1.0).contains(&iou), "{}", value);
    }
    assert_eq!(ctl.set_confidence(f32::NEG_INFINITY), 0.0);
}
