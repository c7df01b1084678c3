//! Frame sources.
//!
//! This module provides the three origins a detection run can target:
//! - Still images (exactly one frame, then exhaustion)
//! - Local video files (feature: video-ffmpeg; `stub://` clips always available)
//! - Cameras by device index (feature: camera-v4l2; `stub://` devices always available)
//!
//! Every source implements `FrameSource`. The worker owns the source for the
//! whole run and calls `close()` exactly once on every exit path.

pub mod camera;
#[cfg(feature = "camera-v4l2")]
mod normalize;
pub mod still;
mod synthetic;
pub mod video;
#[cfg(feature = "video-ffmpeg")]
pub(crate) mod video_ffmpeg;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;

use crate::config::SourceSettings;
use crate::error::PipelineError;
use crate::frame::Frame;

pub use self::camera::{CameraConfig, CameraSource};
pub use self::still::ImageSource;
pub use self::video::{VideoConfig, VideoSource};

/// Recognized still-image extensions (lowercase, no dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Recognized video container extensions (lowercase, no dot).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

/// Prefix of synthetic, in-process sources used by tests and the demo.
pub const STUB_SCHEME: &str = "stub://";

// ----------------------------------------------------------------------------
// Origins
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Image,
    Video,
    Camera,
}

impl SourceKind {
    /// Streamed origins are paced by the worker's frame interval.
    pub fn is_stream(self) -> bool {
        !matches!(self, SourceKind::Image)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Image => "image",
            SourceKind::Video => "video",
            SourceKind::Camera => "camera",
        };
        f.write_str(name)
    }
}

impl FromStr for SourceKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(SourceKind::Image),
            "video" => Ok(SourceKind::Video),
            "camera" => Ok(SourceKind::Camera),
            other => Err(PipelineError::UnsupportedSource(format!(
                "unknown source kind '{}' (expected image, video or camera)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    Image(PathBuf),
    Video(PathBuf),
    Camera(u32),
}

impl Origin {
    /// Validate `source_ref` against the requested kind.
    pub fn parse(kind: SourceKind, source_ref: &str) -> Result<Self, PipelineError> {
        let source_ref = source_ref.trim();
        if source_ref.is_empty() {
            return Err(PipelineError::UnsupportedSource(
                "empty source reference".to_string(),
            ));
        }
        match kind {
            SourceKind::Image => {
                if has_extension(source_ref, IMAGE_EXTENSIONS) {
                    Ok(Origin::Image(PathBuf::from(source_ref)))
                } else {
                    Err(PipelineError::UnsupportedSource(format!(
                        "'{}' is not a recognized image ({})",
                        source_ref,
                        IMAGE_EXTENSIONS.join(", ")
                    )))
                }
            }
            SourceKind::Video => {
                if source_ref.starts_with(STUB_SCHEME) || has_extension(source_ref, VIDEO_EXTENSIONS)
                {
                    Ok(Origin::Video(PathBuf::from(source_ref)))
                } else {
                    Err(PipelineError::UnsupportedSource(format!(
                        "'{}' is not a recognized video ({})",
                        source_ref,
                        VIDEO_EXTENSIONS.join(", ")
                    )))
                }
            }
            SourceKind::Camera => source_ref.parse::<u32>().map(Origin::Camera).map_err(|_| {
                PipelineError::UnsupportedSource(format!(
                    "camera origin must be a non-negative device index, got '{}'",
                    source_ref
                ))
            }),
        }
    }

    /// Pick the kind from the reference alone: integer, then extension.
    pub fn infer(source_ref: &str) -> Result<Self, PipelineError> {
        let trimmed = source_ref.trim();
        if trimmed.parse::<u32>().is_ok() {
            return Self::parse(SourceKind::Camera, trimmed);
        }
        if has_extension(trimmed, IMAGE_EXTENSIONS) {
            return Self::parse(SourceKind::Image, trimmed);
        }
        Self::parse(SourceKind::Video, trimmed)
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Origin::Image(_) => SourceKind::Image,
            Origin::Video(_) => SourceKind::Video,
            Origin::Camera(_) => SourceKind::Camera,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Image(path) | Origin::Video(path) => write!(f, "{}", path.display()),
            Origin::Camera(index) => write!(f, "camera #{}", index),
        }
    }
}

fn has_extension(source_ref: &str, allowed: &[&str]) -> bool {
    Path::new(source_ref)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

// ----------------------------------------------------------------------------
// FrameSource
// ----------------------------------------------------------------------------

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub description: String,
}

/// A lazily-consumed sequence of frames over one origin.
///
/// `next_frame` returns `Ok(None)` once the origin is exhausted: after the
/// single frame of an image, at the end of a video. Cameras never exhaust on
/// their own.
pub trait FrameSource: Send {
    fn kind(&self) -> SourceKind;

    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the capture resource. Further `next_frame` calls yield `None`.
    fn close(&mut self);

    /// Nominal frames per second, when the origin advertises one.
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    fn stats(&self) -> SourceStats;
}

/// Open the capture resource for `origin`.
pub fn open_source(
    origin: &Origin,
    settings: &SourceSettings,
) -> Result<Box<dyn FrameSource>, PipelineError> {
    let source: Box<dyn FrameSource> = match origin {
        Origin::Image(path) => {
            Box::new(ImageSource::open(path).map_err(PipelineError::source_unavailable)?)
        }
        Origin::Video(path) => {
            let config = VideoConfig {
                path: path.to_string_lossy().into_owned(),
                synthetic_width: settings.camera_width,
                synthetic_height: settings.camera_height,
            };
            let mut source = VideoSource::new(config).map_err(PipelineError::source_unavailable)?;
            source.connect().map_err(PipelineError::source_unavailable)?;
            Box::new(source)
        }
        Origin::Camera(index) => {
            let config = CameraConfig {
                device: settings.camera_device(*index),
                target_fps: settings.camera_fps,
                width: settings.camera_width,
                height: settings.camera_height,
            };
            let mut source =
                CameraSource::new(config).map_err(PipelineError::source_unavailable)?;
            source.connect().map_err(PipelineError::source_unavailable)?;
            Box::new(source)
        }
    };
    log::info!("opened {} source: {}", origin.kind(), origin);
    Ok(source)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
