//! Video recording using FFmpeg.
//!
//! Annotated RGB24 frames are converted to YUV420P, encoded as MPEG-4 Part 2
//! (`mp4v`) and muxed into an MP4 container. The file is created from the
//! first frame's dimensions; a later frame of another size is rejected and
//! the recording goes on.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use ffmpeg::util::format::pixel::Pixel;
use ffmpeg_next as ffmpeg;

use super::FrameWriter;
use crate::frame::Frame;

/// Target bitrate per pixel per frame.
const BITS_PER_PIXEL: f64 = 0.2;

struct Recording {
    output: ffmpeg::format::context::Output,
    stream_index: usize,
    encoder: ffmpeg::encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    width: u32,
    height: u32,
    next_pts: i64,
}

enum WriterState {
    /// The file is created from the first frame's dimensions.
    Pending,
    Open(Recording),
    Finished,
    Failed,
}

/// Records annotated frames as MPEG-4 video.
pub struct FfmpegVideoWriter {
    path: PathBuf,
    fps: u32,
    state: WriterState,
    frames_written: u64,
}

impl FfmpegVideoWriter {
    pub fn new(path: impl Into<PathBuf>, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps >= 1.0 {
            fps.round() as u32
        } else {
            30
        };
        Self {
            path: path.into(),
            fps,
            state: WriterState::Pending,
            frames_written: 0,
        }
    }

    fn open(&self, width: u32, height: u32) -> Result<Recording> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut output = ffmpeg::format::output(&self.path)
            .with_context(|| format!("failed to create video file {}", self.path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("ffmpeg has no MPEG-4 encoder"))?;
        // YUV420P needs even dimensions.
        let encoded_width = (width & !1).max(2);
        let encoded_height = (height & !1).max(2);
        let fps = i32::try_from(self.fps).context("frame rate out of range")?;
        let encoder_time_base = ffmpeg::Rational::new(1, fps);

        let mut stream = output.add_stream(codec).context("add video stream")?;
        let stream_index = stream.index();
        let mut encoder =
            ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .context("load video encoder parameters")?
                .encoder()
                .video()
                .context("create ffmpeg video encoder")?;
        encoder.set_width(encoded_width);
        encoder.set_height(encoded_height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(ffmpeg::Rational::new(fps, 1)));
        encoder.set_bit_rate(
            (encoded_width as f64 * encoded_height as f64 * self.fps as f64 * BITS_PER_PIXEL)
                as usize,
        );
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .context("open ffmpeg MPEG-4 encoder")?;
        stream.set_parameters(&encoder);

        output
            .write_header()
            .with_context(|| format!("failed to write header of {}", self.path.display()))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .context("video stream missing after header")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            encoded_width,
            encoded_height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "recording {}x{} @ {} fps to {}",
            encoded_width,
            encoded_height,
            self.fps,
            self.path.display()
        );
        Ok(Recording {
            output,
            stream_index,
            encoder,
            scaler,
            encoder_time_base,
            stream_time_base,
            width,
            height,
            next_pts: 0,
        })
    }
}

impl Recording {
    fn encode(&mut self, frame: &Frame) -> Result<()> {
        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.width, self.height);
        fill_rgb(&mut rgb, frame)?;
        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("scale frame to YUV420P")?;
        yuv.set_pts(Some(self.next_pts));
        self.encoder
            .send_frame(&yuv)
            .context("send frame to ffmpeg encoder")?;
        self.next_pts += 1;
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("mux video packet")?;
        }
        Ok(())
    }

    fn finalize(mut self) -> Result<()> {
        self.encoder.send_eof().context("flush ffmpeg encoder")?;
        self.drain()?;
        self.output.write_trailer().context("write video trailer")?;
        Ok(())
    }
}

impl FrameWriter for FfmpegVideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if matches!(self.state, WriterState::Pending) {
            match self.open(frame.width, frame.height) {
                Ok(recording) => self.state = WriterState::Open(recording),
                Err(err) => {
                    self.state = WriterState::Failed;
                    return Err(err);
                }
            }
        }
        let recording = match &mut self.state {
            WriterState::Open(recording) => recording,
            WriterState::Failed => {
                return Err(anyhow!("video file {} could not be created", self.path.display()))
            }
            _ => return Err(anyhow!("video writer {} already finished", self.path.display())),
        };
        if (frame.width, frame.height) != (recording.width, recording.height) {
            return Err(anyhow!(
                "frame {} is {}x{} but the recording is {}x{}",
                frame.index,
                frame.width,
                frame.height,
                recording.width,
                recording.height
            ));
        }
        recording
            .encode(frame)
            .with_context(|| format!("failed to append frame to {}", self.path.display()))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let recording = match std::mem::replace(&mut self.state, WriterState::Finished) {
            WriterState::Open(recording) => recording,
            _ => return Ok(()),
        };
        recording
            .finalize()
            .with_context(|| format!("failed to finalize {}", self.path.display()))?;
        log::info!(
            "saved {} frames to {}",
            self.frames_written,
            self.path.display()
        );
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for FfmpegVideoWriter {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("{:#}", err);
        }
    }
}

/// Copy packed RGB rows into an ffmpeg frame, honouring its line stride.
fn fill_rgb(target: &mut ffmpeg::frame::Video, frame: &Frame) -> Result<()> {
    let row_bytes = frame.width as usize * 3;
    let stride = target.stride(0);
    let data = target.data_mut(0);
    for (row, pixels) in frame.pixels().chunks_exact(row_bytes).enumerate() {
        let start = row * stride;
        data.get_mut(start..start + row_bytes)
            .context("ffmpeg frame row is out of bounds")?
            .copy_from_slice(pixels);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{FrameSource, VideoConfig, VideoSource};

    fn frame(width: u32, height: u32, index: u64) -> Frame {
        let shade = (index * 40 % 255) as u8;
        Frame::new(
            vec![shade; (width * height * 3) as usize],
            width,
            height,
            index,
        )
        .unwrap()
    }

    fn decoded_frames(path: &Path) -> Result<Vec<(u32, u32)>> {
        let mut source = VideoSource::new(VideoConfig {
            path: path.to_string_lossy().into_owned(),
            ..VideoConfig::default()
        })?;
        source.connect()?;
        let mut sizes = Vec::new();
        while let Some(frame) = source.next_frame()? {
            sizes.push((frame.width, frame.height));
        }
        source.close();
        Ok(sizes)
    }

    #[test]
    fn recording_decodes_back_with_every_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("result_test.mp4");
        let mut writer = FfmpegVideoWriter::new(&path, 30.0);
        for index in 0..5 {
            writer.write_frame(&frame(64, 48, index))?;
        }
        writer.finish()?;
        writer.finish()?;

        assert_eq!(writer.frames_written(), 5);
        assert_eq!(decoded_frames(&path)?, vec![(64, 48); 5]);
        Ok(())
    }

    #[test]
    fn mismatched_frame_is_rejected_and_recording_continues() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mixed.mp4");
        let mut writer = FfmpegVideoWriter::new(&path, 25.0);
        writer.write_frame(&frame(32, 24, 0))?;
        assert!(writer.write_frame(&frame(16, 16, 1)).is_err());
        writer.write_frame(&frame(32, 24, 2))?;
        writer.finish()?;

        assert_eq!(writer.frames_written(), 2);
        assert_eq!(decoded_frames(&path)?.len(), 2);
        Ok(())
    }

    #[test]
    fn odd_dimensions_are_recorded_even() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("odd.mp4");
        let mut writer = FfmpegVideoWriter::new(&path, 30.0);
        writer.write_frame(&frame(33, 25, 0))?;
        writer.finish()?;

        assert_eq!(decoded_frames(&path)?, vec![(32, 24)]);
        Ok(())
    }

    #[test]
    fn no_frames_means_no_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.mp4");
        let mut writer = FfmpegVideoWriter::new(&path, 30.0);
        writer.finish()?;
        assert!(!path.exists());
        assert_eq!(writer.frames_written(), 0);
        Ok(())
    }

    #[test]
    fn unwritable_path_fails_every_frame() {
        let mut writer = FfmpegVideoWriter::new("/nonexistent/dir/out.mp4", 30.0);
        assert!(writer.write_frame(&frame(8, 8, 0)).is_err());
        assert!(writer.write_frame(&frame(8, 8, 1)).is_err());
        assert_eq!(writer.frames_written(), 0);
    }
}
