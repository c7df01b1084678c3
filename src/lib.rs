//! Wafer Inspect
//!
//! This crate runs a surface-defect detector over still images, video files
//! or a live camera and streams annotated results back to an operator.
//!
//! # Architecture
//!
//! A detection run is a single pipeline owned by one worker thread:
//!
//! 1. **Frame Source**: yields frames from one origin and is closed exactly once.
//! 2. **Detector**: a shared backend that returns detections and draws overlays.
//! 3. **Detection Worker**: pulls, infers, renders and posts each step to a
//!    channel, paced at a soft 30 fps for streamed origins; stop is cooperative.
//! 4. **Result Sink**: applies steps on the caller's context (display surfaces,
//!    results table, optional recording, last-result retention).
//!
//! At most one run is active per `DetectionController`.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (still image, video file, camera)
//! - `detect`: detector backends, thresholds, NMS, overlays
//! - `worker`: run state machine and thread
//! - `sink`, `output`: display, results table, video and still export
//! - `controller`: start / stop / save / threshold commands
//! - `config`, `accounts`, `ui`: configuration, login gate, terminal reporting

pub mod accounts;
pub mod config;
pub mod controller;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod output;
pub mod sink;
pub mod ui;
pub mod worker;

pub use accounts::{AccountError, AccountStore};
pub use config::AppConfig;
pub use controller::DetectionController;
pub use detect::{
    build_registry, BackendRegistry, CpuBackend, Detection, DetectionParams, DetectorBackend,
    SharedDetector, StubBackend,
};
pub use error::PipelineError;
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, Origin, SourceKind, SourceStats};
#[cfg(feature = "video-ffmpeg")]
pub use output::FfmpegVideoWriter;
pub use output::{video_writer, FrameWriter, ResultsDir};
pub use sink::{BufferSurface, DisplaySurface, ResultRow, ResultSink, ResultsTable, SinkStats};
pub use worker::{
    DetectionFrame, DetectionWorker, RunHandle, RunOutcome, RunState, RunSummary, WorkerConfig,
    WorkerEvent,
};
