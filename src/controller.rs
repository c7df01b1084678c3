//! Operator-facing command surface.
//!
//! `DetectionController` owns the detection parameters, the shared detector,
//! the result sink and the at-most-one active run. Worker results arrive on a
//! channel and are applied to the sink only from `pump_events*` / `stop`, i.e.
//! on the caller's context; nothing in the worker touches the sink directly.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::config::AppConfig;
use crate::detect::{build_registry, DetectionParams, SharedDetector};
use crate::error::PipelineError;
use crate::ingest::{open_source, Origin, SourceKind};
use crate::output::{
    save_jpeg, video_writer, ResultsDir, RESULT_PREFIX, SNAPSHOT_PREFIX, STILL_EXTENSION,
};
use crate::sink::ResultSink;
use crate::worker::{
    DetectionWorker, RunHandle, RunOutcome, RunState, RunSummary, WorkerConfig, WorkerEvent,
};

struct ActiveRun {
    handle: RunHandle,
    origin: Origin,
}

pub struct DetectionController {
    config: AppConfig,
    params: DetectionParams,
    detector: SharedDetector,
    sink: ResultSink,
    results: ResultsDir,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    active: Option<ActiveRun>,
    next_run_id: u64,
    last_summary: Option<RunSummary>,
    last_saved_video: Option<PathBuf>,
    status: String,
}

impl DetectionController {
    pub fn new(config: AppConfig, detector: SharedDetector, sink: ResultSink) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            params: config.detection,
            results: ResultsDir::new(config.results_dir.clone()),
            config,
            detector,
            sink,
            events_tx,
            events_rx,
            active: None,
            next_run_id: 1,
            last_summary: None,
            last_saved_video: None,
            status: "ready".to_string(),
        }
    }

    /// Build the configured detector and an in-memory sink.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let registry = build_registry(&config.detector)?;
        registry.warm_up_default()?;
        let detector = registry
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend available"))?;
        let sink = ResultSink::with_buffers(&config.display);
        Ok(Self::new(config, detector, sink))
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Start a run over `source_ref`. Thresholds are clamped into [0, 1] and
    /// stay fixed for the run.
    ///
    /// Rejected with `ConcurrentRunRejected` while a run is active, without
    /// touching that run. A source that cannot be opened aborts before any
    /// state changes.
    pub fn start(
        &mut self,
        kind: SourceKind,
        source_ref: &str,
        confidence: f32,
        iou: f32,
    ) -> Result<u64, PipelineError> {
        if self.active.is_some() {
            log::warn!("start rejected: a run is already active");
            return Err(PipelineError::ConcurrentRunRejected);
        }

        let origin = Origin::parse(kind, source_ref).map_err(|err| {
            self.status = err.to_string();
            err
        })?;
        let source = match open_source(&origin, &self.config.sources) {
            Ok(source) => source,
            Err(err) => {
                log::error!("cannot open {}: {}", origin, err);
                self.status = err.to_string();
                return Err(err);
            }
        };

        let mut params = self.params;
        params.set_confidence(confidence);
        params.set_iou(iou);
        self.params = params;

        self.sink.begin_run();
        self.last_saved_video = None;
        if self.records(kind) {
            let fps = source.frame_rate().unwrap_or(self.config.output.fallback_fps);
            match video_writer(&self.results, fps) {
                Ok(writer) => self.sink.attach_writer(writer),
                Err(err) => log::warn!("run will not be recorded: {:#}", err),
            }
        }

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let worker = DetectionWorker::new(
            run_id,
            source,
            self.detector.clone(),
            params,
            WorkerConfig {
                frame_interval: self.config.frame_interval,
            },
            self.events_tx.clone(),
        );
        let handle = match worker.spawn() {
            Ok(handle) => handle,
            Err(err) => {
                self.sink.finish_writer();
                let err = PipelineError::DetectorFailure(format!("{:#}", err));
                self.status = err.to_string();
                return Err(err);
            }
        };

        self.status = match &origin {
            Origin::Image(_) | Origin::Video(_) => format!("detecting {}: {}", kind, origin),
            Origin::Camera(_) => format!("detecting from {}", origin),
        };
        self.active = Some(ActiveRun { handle, origin });
        Ok(run_id)
    }

    /// Stop the active run and wait for the worker to exit. No-op when idle.
    ///
    /// Every result the worker produced before stopping is applied to the
    /// sink before this returns, and the video file is finalized.
    pub fn stop(&mut self) -> Option<RunSummary> {
        let active = self.active.take()?;
        let run_id = active.handle.run_id();
        let kind = active.handle.kind();
        active.handle.stop();

        let mut summary = None;
        for event in self.events_rx.try_iter() {
            match event {
                WorkerEvent::Frame(step) if step.run_id == run_id => self.sink.handle(step),
                WorkerEvent::Finished(s) if s.run_id == run_id => summary = Some(s),
                _ => {}
            }
        }
        // A worker that died outside its loop never reports.
        let summary = summary.unwrap_or_else(|| RunSummary {
            run_id,
            kind,
            outcome: RunOutcome::Failed(PipelineError::DetectorFailure(
                "worker exited without reporting".to_string(),
            )),
            frames_emitted: self.sink.stats().frames_handled,
        });
        self.conclude(&active.origin, summary.clone());
        if summary.outcome == RunOutcome::Stopped {
            self.status = "detection stopped".to_string();
        }
        Some(summary)
    }

    /// Write the last annotated frame to the results directory.
    ///
    /// Named `snapshot_<ts>.jpg` while a video or camera run is active,
    /// otherwise `result_<ts>.jpg`.
    pub fn save_last_result(&mut self) -> Result<PathBuf, PipelineError> {
        let frame = self
            .sink
            .last_result()
            .ok_or(PipelineError::NoResultAvailable)?;
        let streaming = self
            .active
            .as_ref()
            .map(|run| run.origin.kind().is_stream())
            .unwrap_or(false);
        let prefix = if streaming {
            SNAPSHOT_PREFIX
        } else {
            RESULT_PREFIX
        };
        let path = self
            .results
            .timestamped(prefix, STILL_EXTENSION)
            .map_err(PipelineError::output)?;
        if let Err(err) = save_jpeg(frame, &path, self.config.output.jpeg_quality) {
            let err = PipelineError::output(err);
            log::warn!("{}", err);
            return Err(err);
        }
        log::info!("saved result to {}", path.display());
        self.status = format!("saved {}", path.display());
        Ok(path)
    }

    /// Clamp and store the confidence threshold used by the next run.
    pub fn set_confidence(&mut self, value: f32) -> f32 {
        self.params.set_confidence(value)
    }

    /// Clamp and store the IoU threshold used by the next run.
    pub fn set_iou(&mut self, value: f32) -> f32 {
        self.params.set_iou(value)
    }

    // ------------------------------------------------------------------------
    // Event pump
    // ------------------------------------------------------------------------

    /// Apply every pending worker event to the sink without blocking.
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for the first event, then drain the rest.
    pub fn pump_events_timeout(&mut self, timeout: Duration) -> usize {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.apply(event);
                1 + self.pump_events()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Pump events until the active run finishes or `timeout` elapses.
    pub fn wait_for_finish(&mut self, timeout: Duration) -> Option<RunSummary> {
        let deadline = Instant::now() + timeout;
        while self.active.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.pump_events_timeout((deadline - now).min(Duration::from_millis(100)));
        }
        self.last_summary.clone()
    }

    fn apply(&mut self, event: WorkerEvent) {
        let active_id = self.active.as_ref().map(|run| run.handle.run_id());
        match event {
            WorkerEvent::Frame(step) if Some(step.run_id) == active_id => self.sink.handle(step),
            WorkerEvent::Finished(summary) if Some(summary.run_id) == active_id => {
                if let Some(active) = self.active.take() {
                    active.handle.join();
                    self.conclude(&active.origin, summary);
                }
            }
            other => log::debug!("ignoring event from a concluded run: {:?}", event_run(&other)),
        }
    }

    /// Finalize the writer and record the summary of a run that ended.
    fn conclude(&mut self, origin: &Origin, summary: RunSummary) {
        self.last_saved_video = self.sink.finish_writer();
        self.status = match (&summary.outcome, origin.kind()) {
            (RunOutcome::Failed(err), _) => err.to_string(),
            (_, SourceKind::Image) => "image detection finished".to_string(),
            (_, SourceKind::Video) => match &self.last_saved_video {
                Some(path) => format!("video detection finished, saved {}", path.display()),
                None => "video detection finished".to_string(),
            },
            (_, SourceKind::Camera) => "camera detection stopped".to_string(),
        };
        self.last_summary = Some(summary);
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    fn records(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Image => false,
            SourceKind::Video => self.config.output.record_video,
            SourceKind::Camera => self.config.output.record_camera,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// State of the current run; `Finished` once a run has concluded and no
    /// other is active, `Idle` before the first run.
    pub fn run_state(&self) -> RunState {
        match &self.active {
            Some(run) => run.handle.state(),
            None if self.last_summary.is_some() => RunState::Finished,
            None => RunState::Idle,
        }
    }

    pub fn params(&self) -> DetectionParams {
        self.params
    }

    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    /// Video file written by the most recently concluded run.
    pub fn last_saved_video(&self) -> Option<&PathBuf> {
        self.last_saved_video.as_ref()
    }

    /// One-line status mirroring the operator's status bar.
    pub fn status(&self) -> &str {
        &self.status
    }
}

impl Drop for DetectionController {
    fn drop(&mut self) {
        if self.active.is_some() {
            self.stop();
        }
    }
}

fn event_run(event: &WorkerEvent) -> u64 {
    match event {
        WorkerEvent::Frame(step) => step.run_id,
        WorkerEvent::Finished(summary) => summary.run_id,
    }
}
