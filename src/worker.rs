//! Detection worker: drives one run of source -> detector -> event channel on
//! a dedicated thread.
//!
//! State machine: `Idle -> Running -> (Stopping) -> Finished`. A stop command
//! is observed at the top of every iteration and during the inter-frame
//! interval, never in the middle of an inference call. Whatever ends the run
//! (exhaustion, stop, failure), the source is closed exactly once and a single
//! `WorkerEvent::Finished` is sent after the last frame event.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::detect::{Detection, DetectionParams, DetectorBackend, SharedDetector};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceKind};

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(33);

// ----------------------------------------------------------------------------
// Run state
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopping,
    Finished,
}

impl RunState {
    fn as_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::Stopping => 2,
            RunState::Finished => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Stopping,
            3 => RunState::Finished,
            _ => RunState::Idle,
        }
    }
}

/// Run state shared between the worker thread and its handle.
#[derive(Clone, Debug)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(RunState::Idle.as_u8())))
    }

    fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: RunState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    Stop,
}

/// One processing step: the source frame, its annotated copy and the
/// detections found in it.
#[derive(Clone, Debug)]
pub struct DetectionFrame {
    pub run_id: u64,
    /// 0-based position of this step within the run.
    pub sequence: u64,
    pub original: Frame,
    pub annotated: Frame,
    pub detections: Vec<Detection>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// The source ran out of frames.
    Exhausted,
    /// A stop command (or a dropped handle) ended the run.
    Stopped,
    Failed(PipelineError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub run_id: u64,
    pub kind: SourceKind,
    pub outcome: RunOutcome,
    pub frames_emitted: u64,
}

#[derive(Clone, Debug)]
pub enum WorkerEvent {
    Frame(DetectionFrame),
    Finished(RunSummary),
}

#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    /// Pause between frames of streamed origins.
    pub frame_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

pub struct DetectionWorker {
    run_id: u64,
    source: Box<dyn FrameSource>,
    detector: SharedDetector,
    params: DetectionParams,
    config: WorkerConfig,
    events: Sender<WorkerEvent>,
}

impl DetectionWorker {
    /// `params` are copied in and stay fixed for the whole run.
    pub fn new(
        run_id: u64,
        source: Box<dyn FrameSource>,
        detector: SharedDetector,
        params: DetectionParams,
        config: WorkerConfig,
        events: Sender<WorkerEvent>,
    ) -> Self {
        Self {
            run_id,
            source,
            detector,
            params,
            config,
            events,
        }
    }

    /// Start the run on its own thread.
    pub fn spawn(self) -> Result<RunHandle> {
        let name = format!("detect-run-{}", self.run_id);
        self.spawn_with(move |body| std::thread::Builder::new().name(name).spawn(body))
    }

    /// Start the run through `spawner`. If the spawner fails the source is
    /// closed here, since the run loop never got to own it.
    pub(crate) fn spawn_with<S>(self, spawner: S) -> Result<RunHandle>
    where
        S: FnOnce(Box<dyn FnOnce() + Send + 'static>) -> std::io::Result<JoinHandle<()>>,
    {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let state = StateCell::new();
        let run_id = self.run_id;
        let kind = self.source.kind();
        let thread_state = state.clone();

        let slot = Arc::new(Mutex::new(Some(self)));
        let thread_slot = Arc::clone(&slot);
        let spawned = spawner(Box::new(move || {
            if let Some(worker) = take_worker(&thread_slot) {
                worker.run(control_rx, thread_state);
            }
        }));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                if let Some(mut worker) = take_worker(&slot) {
                    worker.source.close();
                }
                return Err(err).context("failed to spawn detection worker thread");
            }
        };
        Ok(RunHandle {
            run_id,
            kind,
            control: control_tx,
            state,
            thread: Some(thread),
        })
    }

    fn run(mut self, control: Receiver<ControlCommand>, state: StateCell) {
        state.set(RunState::Running);
        let kind = self.source.kind();
        log::info!(
            "run {} started ({} source, conf={:.2}, iou={:.2})",
            self.run_id,
            kind,
            self.params.confidence(),
            self.params.iou()
        );

        let mut emitted = 0u64;
        let outcome = loop {
            if stop_requested(&control) {
                break RunOutcome::Stopped;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break RunOutcome::Exhausted,
                Err(err) => {
                    break RunOutcome::Failed(PipelineError::SourceUnavailable(format!(
                        "frame read failed: {:#}",
                        err
                    )))
                }
            };

            let (annotated, detections) = match self.process(&frame) {
                Ok(result) => result,
                Err(err) => break RunOutcome::Failed(err),
            };

            let step = DetectionFrame {
                run_id: self.run_id,
                sequence: emitted,
                original: frame,
                annotated,
                detections,
            };
            if self.events.send(WorkerEvent::Frame(step)).is_err() {
                log::warn!("run {}: result receiver dropped, stopping", self.run_id);
                break RunOutcome::Stopped;
            }
            emitted += 1;

            if !kind.is_stream() {
                continue;
            }
            match control.recv_timeout(self.config.frame_interval) {
                Ok(ControlCommand::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    break RunOutcome::Stopped
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        };

        if outcome == RunOutcome::Stopped {
            state.set(RunState::Stopping);
        }
        self.source.close();

        match &outcome {
            RunOutcome::Failed(err) => {
                log::error!("run {} failed after {} frames: {}", self.run_id, emitted, err)
            }
            _ => log::info!(
                "run {} finished ({:?}) after {} frames",
                self.run_id,
                outcome,
                emitted
            ),
        }

        let summary = RunSummary {
            run_id: self.run_id,
            kind,
            outcome,
            frames_emitted: emitted,
        };
        state.set(RunState::Finished);
        // The receiver may already be gone when the controller was dropped.
        let _ = self.events.send(WorkerEvent::Finished(summary));
    }

    /// Infer, validate and render one frame.
    fn process(&self, frame: &Frame) -> Result<(Frame, Vec<Detection>), PipelineError> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| PipelineError::DetectorFailure("detector lock poisoned".to_string()))?;
        let params = self.params;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            infer_and_render(&mut *detector, frame, &params)
        }));
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(PipelineError::DetectorFailure(format!(
                "detector panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

fn take_worker(slot: &Mutex<Option<DetectionWorker>>) -> Option<DetectionWorker> {
    slot.lock().ok().and_then(|mut worker| worker.take())
}

fn infer_and_render(
    detector: &mut dyn DetectorBackend,
    frame: &Frame,
    params: &DetectionParams,
) -> Result<(Frame, Vec<Detection>), PipelineError> {
    let raw = detector
        .infer(frame, params)
        .map_err(PipelineError::detector)?;
    let detections = validate_detections(raw, params.confidence())?;
    let annotated = detector
        .render(frame, &detections)
        .map_err(PipelineError::detector)?;
    if (annotated.width, annotated.height) != (frame.width, frame.height) {
        return Err(PipelineError::DetectorFailure(format!(
            "render produced {}x{} for a {}x{} frame",
            annotated.width, annotated.height, frame.width, frame.height
        )));
    }
    Ok((annotated, detections))
}

/// Reject malformed detections and drop those under the confidence threshold.
fn validate_detections(
    detections: Vec<Detection>,
    confidence: f32,
) -> Result<Vec<Detection>, PipelineError> {
    if let Some(bad) = detections.iter().find(|d| !d.is_well_formed()) {
        return Err(PipelineError::DetectorFailure(format!(
            "malformed detection {:?}",
            bad
        )));
    }
    let total = detections.len();
    let kept: Vec<Detection> = detections
        .into_iter()
        .filter(|d| d.confidence >= confidence)
        .collect();
    if kept.len() < total {
        log::debug!(
            "dropped {} detections below confidence {:.2}",
            total - kept.len(),
            confidence
        );
    }
    Ok(kept)
}

fn stop_requested(control: &Receiver<ControlCommand>) -> bool {
    match control.try_recv() {
        Ok(ControlCommand::Stop) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Owner side of a running worker. Dropping an unfinished handle stops and
/// joins the worker.
pub struct RunHandle {
    run_id: u64,
    kind: SourceKind,
    control: Sender<ControlCommand>,
    state: StateCell,
    thread: Option<JoinHandle<()>>,
}

impl RunHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == RunState::Finished
    }

    /// Ask the worker to stop without waiting for it.
    pub fn request_stop(&self) {
        // Sending only fails once the worker has exited.
        let _ = self.control.send(ControlCommand::Stop);
    }

    /// Request a stop and block until the worker thread has exited.
    pub fn stop(mut self) {
        self.request_stop();
        self.join_thread();
    }

    /// Block until the run ends on its own.
    pub fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("detection worker for run {} panicked", self.run_id);
                self.state.set(RunState::Finished);
            }
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.request_stop();
            self.join_thread();
        }
    }
}
