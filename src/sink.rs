//! Result sink: consumes detection steps on the caller's context.
//!
//! For every step it independently
//! - scales the original and annotated frames into their display surfaces,
//! - replaces the results table with this step's detections,
//! - appends the annotated frame to the attached video writer, if any.
//!
//! The last annotated frame is retained for `save_last_result` whether or not
//! recording is active. A failed write is logged and counted; the run goes on.

use std::fmt;
use std::path::PathBuf;

use image::RgbImage;

use crate::config::DisplaySettings;
use crate::detect::Detection;
use crate::frame::{fit_within, Frame};
use crate::output::FrameWriter;
use crate::worker::DetectionFrame;

// ----------------------------------------------------------------------------
// Display surfaces
// ----------------------------------------------------------------------------

pub trait DisplaySurface: Send {
    /// Available area in pixels (width, height).
    fn area(&self) -> (u32, u32);

    /// Show an image already scaled to fit `area()`.
    fn present(&mut self, image: RgbImage);
}

/// In-memory surface: keeps the last presented image.
#[derive(Debug)]
pub struct BufferSurface {
    width: u32,
    height: u32,
    current: Option<RgbImage>,
    presented: u64,
}

impl BufferSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            current: None,
            presented: 0,
        }
    }

    pub fn from_settings(settings: &DisplaySettings) -> Self {
        Self::new(settings.width, settings.height)
    }

    pub fn current(&self) -> Option<&RgbImage> {
        self.current.as_ref()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl DisplaySurface for BufferSurface {
    fn area(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&mut self, image: RgbImage) {
        self.current = Some(image);
        self.presented += 1;
    }
}

// ----------------------------------------------------------------------------
// Results table
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct ResultRow {
    pub label: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
}

impl ResultRow {
    /// Cell text: label, confidence to 2 places, center to 1 place.
    pub fn cells(&self) -> [String; 4] {
        [
            self.label.clone(),
            format!("{:.2}", self.confidence),
            format!("{:.1}", self.x),
            format!("{:.1}", self.y),
        ]
    }
}

impl From<&Detection> for ResultRow {
    fn from(detection: &Detection) -> Self {
        Self {
            label: detection.label.clone(),
            confidence: detection.confidence,
            x: detection.x,
            y: detection.y,
        }
    }
}

/// Detections of the most recent step. Replaced wholesale, never accumulated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultsTable {
    rows: Vec<ResultRow>,
}

impl ResultsTable {
    pub const HEADERS: [&'static str; 4] = ["class", "confidence", "x", "y"];

    pub fn replace(&mut self, detections: &[Detection]) {
        self.rows = detections.iter().map(ResultRow::from).collect();
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for ResultsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<[String; 4]> = self.rows.iter().map(ResultRow::cells).collect();
        let mut widths = Self::HEADERS.map(str::len);
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.len());
            }
        }
        let line = |f: &mut fmt::Formatter<'_>, row: [&str; 4]| -> fmt::Result {
            writeln!(
                f,
                "{:<w0$}  {:>w1$}  {:>w2$}  {:>w3$}",
                row[0],
                row[1],
                row[2],
                row[3],
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2],
                w3 = widths[3]
            )
        };
        line(f, Self::HEADERS)?;
        for row in &cells {
            line(f, [row[0].as_str(), row[1].as_str(), row[2].as_str(), row[3].as_str()])?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Sink
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub frames_handled: u64,
    pub frames_recorded: u64,
    pub write_failures: u64,
}

pub struct ResultSink {
    original: Box<dyn DisplaySurface>,
    annotated: Box<dyn DisplaySurface>,
    table: ResultsTable,
    writer: Option<Box<dyn FrameWriter>>,
    last_result: Option<Frame>,
    last_detections: Vec<Detection>,
    stats: SinkStats,
}

impl ResultSink {
    pub fn new(original: Box<dyn DisplaySurface>, annotated: Box<dyn DisplaySurface>) -> Self {
        Self {
            original,
            annotated,
            table: ResultsTable::default(),
            writer: None,
            last_result: None,
            last_detections: Vec::new(),
            stats: SinkStats::default(),
        }
    }

    /// Sink with two in-memory surfaces of the configured display size.
    pub fn with_buffers(settings: &DisplaySettings) -> Self {
        Self::new(
            Box::new(BufferSurface::from_settings(settings)),
            Box::new(BufferSurface::from_settings(settings)),
        )
    }

    /// Consume one step. Persistence failures never propagate.
    pub fn handle(&mut self, step: DetectionFrame) {
        let DetectionFrame {
            original,
            annotated,
            detections,
            ..
        } = step;

        let (w, h) = self.original.area();
        self.original.present(fit_within(&original, w, h));
        let (w, h) = self.annotated.area();
        self.annotated.present(fit_within(&annotated, w, h));

        self.table.replace(&detections);

        if let Some(writer) = self.writer.as_mut() {
            match writer.write_frame(&annotated) {
                Ok(()) => self.stats.frames_recorded += 1,
                Err(err) => {
                    self.stats.write_failures += 1;
                    log::warn!(
                        "skipping frame {} for {}: {:#}",
                        annotated.index,
                        writer.path().display(),
                        err
                    );
                }
            }
        }

        self.last_result = Some(annotated);
        self.last_detections = detections;
        self.stats.frames_handled += 1;
    }

    /// Attach a writer for the current run, finishing any previous one.
    pub fn attach_writer(&mut self, writer: Box<dyn FrameWriter>) {
        self.finish_writer();
        self.writer = Some(writer);
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    /// Finalize and detach the writer. Returns the file path when at least one
    /// frame was recorded.
    pub fn finish_writer(&mut self) -> Option<PathBuf> {
        let mut writer = self.writer.take()?;
        if let Err(err) = writer.finish() {
            self.stats.write_failures += 1;
            log::warn!("{:#}", err);
            return None;
        }
        if writer.frames_written() > 0 {
            Some(writer.path().to_path_buf())
        } else {
            None
        }
    }

    /// Reset per-run state before a new run: table and counters.
    pub fn begin_run(&mut self) {
        self.table.clear();
        self.stats = SinkStats::default();
    }

    pub fn table(&self) -> &ResultsTable {
        &self.table
    }

    /// Most recent annotated frame, if any step was handled.
    pub fn last_result(&self) -> Option<&Frame> {
        self.last_result.as_ref()
    }

    pub fn last_detections(&self) -> &[Detection] {
        &self.last_detections
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }
}
