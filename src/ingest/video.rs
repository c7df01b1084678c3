//! Local video file frame source.
//!
//! `VideoSource` reads frames from a local video file. Real containers are
//! decoded with FFmpeg (feature: video-ffmpeg); `stub://` references produce a
//! finite synthetic clip for tests and the demo.
//!
//! The video source is responsible for:
//! - Refusing URL schemes other than `stub://` (local files only)
//! - Reporting the container's nominal frame rate
//! - Returning `None` at end of stream, never an error

use anyhow::{anyhow, Result};

use super::synthetic::{scene_pixels, stub_frame_limit};
#[cfg(feature = "video-ffmpeg")]
use super::video_ffmpeg::FfmpegVideoSource;
use super::{FrameSource, SourceKind, SourceStats, STUB_SCHEME};
use crate::frame::Frame;

/// Frames in a `stub://` clip without an explicit `?frames=N`.
pub const DEFAULT_STUB_FRAMES: u64 = 30;

const STUB_FPS: f64 = 30.0;

/// Configuration for a local video source.
#[derive(Clone, Debug)]
pub struct VideoConfig {
    /// Local file path (e.g., "recordings/line3.mp4") or `stub://name?frames=N`.
    pub path: String,
    /// Frame width for synthetic clips.
    pub synthetic_width: u32,
    /// Frame height for synthetic clips.
    pub synthetic_height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            synthetic_width: 640,
            synthetic_height: 480,
        }
    }
}

/// Local video frame source.
pub struct VideoSource {
    path: String,
    backend: Option<VideoBackend>,
    frames_captured: u64,
}

enum VideoBackend {
    Synthetic(SyntheticClip),
    #[cfg(feature = "video-ffmpeg")]
    Ffmpeg(FfmpegVideoSource),
}

impl VideoSource {
    pub fn new(config: VideoConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "video ingestion only supports local paths (no URL schemes)"
            ));
        }
        let path = config.path.clone();
        let backend = if config.path.starts_with(STUB_SCHEME) {
            VideoBackend::Synthetic(SyntheticClip::new(config))
        } else {
            if !std::path::Path::new(&config.path).is_file() {
                return Err(anyhow!("video file {} does not exist", config.path));
            }
            #[cfg(feature = "video-ffmpeg")]
            {
                VideoBackend::Ffmpeg(FfmpegVideoSource::new(&config.path)?)
            }
            #[cfg(not(feature = "video-ffmpeg"))]
            {
                return Err(anyhow!(
                    "video decoding requires the video-ffmpeg feature"
                ));
            }
        };
        Ok(Self {
            path,
            backend: Some(backend),
            frames_captured: 0,
        })
    }

    /// Connect to the file.
    pub fn connect(&mut self) -> Result<()> {
        match self.backend.as_mut() {
            Some(VideoBackend::Synthetic(_)) => {
                log::info!("VideoSource: connected to {} (synthetic)", self.path);
                Ok(())
            }
            #[cfg(feature = "video-ffmpeg")]
            Some(VideoBackend::Ffmpeg(source)) => source.connect(),
            None => Err(anyhow!("video source {} already closed", self.path)),
        }
    }
}

impl FrameSource for VideoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Video
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = match self.backend.as_mut() {
            Some(VideoBackend::Synthetic(clip)) => clip.next_frame()?,
            #[cfg(feature = "video-ffmpeg")]
            Some(VideoBackend::Ffmpeg(source)) => source.next_frame()?,
            None => None,
        };
        if frame.is_some() {
            self.frames_captured += 1;
        }
        Ok(frame)
    }

    fn close(&mut self) {
        if self.backend.take().is_some() {
            log::info!(
                "VideoSource: closed {} after {} frames",
                self.path,
                self.frames_captured
            );
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        match self.backend.as_ref()? {
            VideoBackend::Synthetic(_) => Some(STUB_FPS),
            #[cfg(feature = "video-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.frame_rate(),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            description: self.path.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic clip (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticClip {
    config: VideoConfig,
    frame_limit: u64,
    next_index: u64,
}

impl SyntheticClip {
    fn new(config: VideoConfig) -> Self {
        let frame_limit = stub_frame_limit(&config.path).unwrap_or(DEFAULT_STUB_FRAMES);
        Self {
            config,
            frame_limit,
            next_index: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_index >= self.frame_limit {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        let pixels = scene_pixels(
            self.config.synthetic_width,
            self.config.synthetic_height,
            index,
        );
        Frame::new(
            pixels,
            self.config.synthetic_width,
            self.config.synthetic_height,
            index,
        )
        .map(Some)
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}
