//! Still-image frame source.
//!
//! Opening only checks that the file exists; decoding happens on the first
//! `next_frame()`, i.e. on the worker thread. A missing file fails before a
//! run starts, a corrupt one fails the run. The source yields exactly one
//! frame.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceKind, SourceStats};
use crate::frame::Frame;

pub struct ImageSource {
    path: PathBuf,
    decoded: bool,
    frames_captured: u64,
    closed: bool,
}

impl ImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(anyhow!("image file {} does not exist", path.display()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            decoded: false,
            frames_captured: 0,
            closed: false,
        })
    }

    fn decode(&self) -> Result<Frame> {
        let decoded = image::open(&self.path)
            .with_context(|| format!("failed to decode image {}", self.path.display()))?;
        let frame = Frame::from_rgb_image(decoded.into_rgb8(), 0);
        log::debug!(
            "ImageSource: decoded {} ({}x{})",
            self.path.display(),
            frame.width,
            frame.height
        );
        Ok(frame)
    }
}

impl FrameSource for ImageSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Image
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed || self.decoded {
            return Ok(None);
        }
        // One attempt only; a corrupt file does not get retried.
        self.decoded = true;
        let frame = self.decode()?;
        self.frames_captured += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            log::info!("ImageSource: closed {}", self.path.display());
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            description: self.path.display().to_string(),
        }
    }
}
