//! Persisted output: the results directory, still-image export and the
//! video writer used to record annotated frames.
//!
//! Video recording is encoded with FFmpeg (feature: video-ffmpeg). Without
//! the feature `video_writer` refuses and runs go unrecorded.
//!
//! File names carry a local timestamp (`%Y%m%d_%H%M%S`). Two files created in
//! the same second get a `_N` suffix instead of overwriting each other.

#[cfg(feature = "video-ffmpeg")]
mod video_ffmpeg;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::Frame;

#[cfg(feature = "video-ffmpeg")]
pub use video_ffmpeg::FfmpegVideoWriter;

pub const VIDEO_PREFIX: &str = "result";
pub const VIDEO_EXTENSION: &str = "mp4";
pub const STILL_EXTENSION: &str = "jpg";

/// Prefix of a still saved while a stream run is active.
pub const SNAPSHOT_PREFIX: &str = "snapshot";
/// Prefix of a still saved when no stream run is active.
pub const RESULT_PREFIX: &str = "result";

/// Sequential sink for annotated frames of one run.
pub trait FrameWriter: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the output. Further calls are no-ops.
    fn finish(&mut self) -> Result<()>;

    fn path(&self) -> &Path;

    fn frames_written(&self) -> u64;
}

/// Directory that receives recordings and exported stills.
#[derive(Clone, Debug)]
pub struct ResultsDir {
    root: PathBuf,
}

impl ResultsDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory (and parents) if missing.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create results dir {}", self.root.display()))
    }

    /// Fresh `<prefix>_<timestamp>.<ext>` path inside the directory.
    pub fn timestamped(&self, prefix: &str, extension: &str) -> Result<PathBuf> {
        self.ensure()?;
        Ok(self.unique(&format!("{}_{}", prefix, timestamp()), extension))
    }

    fn unique(&self, stem: &str, extension: &str) -> PathBuf {
        let first = self.root.join(format!("{}.{}", stem, extension));
        if !first.exists() {
            return first;
        }
        (1u32..)
            .map(|n| self.root.join(format!("{}_{}.{}", stem, n, extension)))
            .find(|candidate| !candidate.exists())
            .unwrap_or(first)
    }
}

/// Open a recorder for a new `result_<ts>.mp4` in `results`.
#[cfg(feature = "video-ffmpeg")]
pub fn video_writer(results: &ResultsDir, fps: f64) -> Result<Box<dyn FrameWriter>> {
    let path = results.timestamped(VIDEO_PREFIX, VIDEO_EXTENSION)?;
    Ok(Box::new(FfmpegVideoWriter::new(path, fps)))
}

#[cfg(not(feature = "video-ffmpeg"))]
pub fn video_writer(results: &ResultsDir, _fps: f64) -> Result<Box<dyn FrameWriter>> {
    Err(anyhow::anyhow!(
        "recording into {} requires the video-ffmpeg feature",
        results.path().display()
    ))
}

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub(crate) fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode(
            frame.pixels(),
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .context("failed to encode JPEG")?;
    Ok(buf)
}

/// Write `frame` as a JPEG file at `path`.
pub fn save_jpeg(frame: &Frame, path: &Path, quality: u8) -> Result<()> {
    let bytes = encode_jpeg(frame, quality)?;
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamped_paths_do_not_collide() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let results = ResultsDir::new(dir.path().join("results"));

        let first = results.timestamped(RESULT_PREFIX, STILL_EXTENSION)?;
        fs::write(&first, b"x")?;
        let second = results.timestamped(RESULT_PREFIX, STILL_EXTENSION)?;

        assert!(results.path().is_dir());
        assert_ne!(first, second);
        let name = first.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("result_"));
        assert!(name.ends_with(".jpg"));
        // result_YYYYmmdd_HHMMSS.jpg
        assert_eq!(name.len(), "result_".len() + 15 + ".jpg".len());
        Ok(())
    }

    #[test]
    fn save_jpeg_writes_decodable_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("still.jpg");
        let frame = Frame::new(vec![128u8; 16 * 8 * 3], 16, 8, 0)?;
        save_jpeg(&frame, &path, 90)?;
        let decoded = image::open(&path)?;
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
        Ok(())
    }

    #[cfg(not(feature = "video-ffmpeg"))]
    #[test]
    fn video_writer_needs_ffmpeg_and_creates_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let results = ResultsDir::new(dir.path().join("results"));
        assert!(video_writer(&results, 30.0).is_err());
        assert!(!results.path().exists());
        Ok(())
    }

    #[cfg(feature = "video-ffmpeg")]
    #[test]
    fn video_writer_targets_timestamped_mp4() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let results = ResultsDir::new(dir.path().join("results"));
        let writer = video_writer(&results, 30.0)?;
        let name = writer
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        assert!(name.starts_with("result_"), "{}", name);
        assert!(name.ends_with(".mp4"), "{}", name);
        Ok(())
    }

    #[test]
    fn save_jpeg_into_missing_dir_fails() {
        let frame = Frame::new(vec![0u8; 12], 2, 2, 0).unwrap();
        assert!(save_jpeg(&frame, Path::new("/nonexistent/dir/x.jpg"), 90).is_err());
    }
}
