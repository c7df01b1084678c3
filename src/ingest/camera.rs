//! Camera frame source.
//!
//! This module provides `CameraSource` for capturing frames from a local
//! camera selected by device index. The index is mapped to a device path
//! through the configured template (e.g. "/dev/video{index}").
//!
//! The camera source is responsible for:
//! - Opening the device node and negotiating an RGB-convertible format
//! - Normalizing captured buffers to RGB24
//! - Releasing the device deterministically on `close()`
//!
//! Cameras never exhaust on their own; a run over a camera ends on stop or
//! on a capture failure.

use anyhow::{anyhow, Result};
#[cfg(feature = "camera-v4l2")]
use anyhow::Context;
#[cfg(feature = "camera-v4l2")]
use ouroboros::self_referencing;

#[cfg(feature = "camera-v4l2")]
use super::normalize::{normalize_to_rgb, PixelFormat};
use super::synthetic::scene_pixels;
use super::{FrameSource, SourceKind, SourceStats, STUB_SCHEME};
use crate::frame::Frame;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or a `stub://` device.
    pub device: String,
    /// Requested frame rate (frames per second).
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

/// Camera frame source.
///
/// Uses libv4l for real devices, with a synthetic fallback for `stub://` paths.
pub struct CameraSource {
    device: String,
    target_fps: u32,
    backend: Option<CameraBackend>,
    frames_captured: u64,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(V4l2Camera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let device = config.device.clone();
        let target_fps = config.target_fps;
        let backend = if config.device.starts_with(STUB_SCHEME) {
            CameraBackend::Synthetic(SyntheticCamera::new(config))
        } else {
            #[cfg(feature = "camera-v4l2")]
            {
                CameraBackend::Device(V4l2Camera::new(config))
            }
            #[cfg(not(feature = "camera-v4l2"))]
            {
                return Err(anyhow!(
                    "camera capture of {} requires the camera-v4l2 feature",
                    config.device
                ));
            }
        };
        Ok(Self {
            device,
            target_fps,
            backend: Some(backend),
            frames_captured: 0,
        })
    }

    /// Open the device.
    pub fn connect(&mut self) -> Result<()> {
        match self.backend.as_mut() {
            Some(CameraBackend::Synthetic(_)) => {
                log::info!("CameraSource: connected to {} (synthetic)", self.device);
                Ok(())
            }
            #[cfg(feature = "camera-v4l2")]
            Some(CameraBackend::Device(camera)) => camera.connect(),
            None => Err(anyhow!("camera {} already closed", self.device)),
        }
    }
}

impl FrameSource for CameraSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let index = self.frames_captured;
        let frame = match self.backend.as_mut() {
            Some(CameraBackend::Synthetic(camera)) => camera.capture(index)?,
            #[cfg(feature = "camera-v4l2")]
            Some(CameraBackend::Device(camera)) => camera.capture(index)?,
            None => return Ok(None),
        };
        self.frames_captured += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.backend.take().is_some() {
            log::info!(
                "CameraSource: released {} after {} frames",
                self.device,
                self.frames_captured
            );
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        if self.target_fps == 0 {
            None
        } else {
            Some(self.target_fps as f64)
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            description: self.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    fn capture(&mut self, index: u64) -> Result<Frame> {
        let pixels = scene_pixels(self.config.width, self.config.height, index);
        Frame::new(pixels, self.config.width, self.config.height, index)
    }
}

// ----------------------------------------------------------------------------
// Production camera using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
struct V4l2Camera {
    config: CameraConfig,
    state: Option<V4l2State>,
    pixel_format: PixelFormat,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "camera-v4l2")]
#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "camera-v4l2")]
impl V4l2Camera {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            pixel_format: PixelFormat::Rgb24,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open camera device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"NV12" => PixelFormat::Nv12,
            b"YUYV" => PixelFormat::Yuyv,
            other => {
                return Err(anyhow!(
                    "camera {} delivers unsupported pixel format {}",
                    self.config.device,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "CameraSource: connected to {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn capture(&mut self, index: u64) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("camera device not connected")?;
        let (width, height, format) = (self.active_width, self.active_height, self.pixel_format);
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture camera frame"))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, format)
        })?;
        Frame::new(pixels, width, height, index)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://camera0".to_string(),
            target_fps: 30,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn camera_source_produces_indexed_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;

        for expected in 0..5 {
            let frame = source.next_frame()?.expect("camera never exhausts");
            assert_eq!(frame.index, expected);
            assert_eq!((frame.width, frame.height), (64, 48));
        }
        assert_eq!(source.stats().frames_captured, 5);
        assert_eq!(source.frame_rate(), Some(30.0));
        Ok(())
    }

    #[test]
    fn closed_camera_stops_producing() -> Result<()> {
        let mut source = CameraSource::new(stub_config())?;
        source.connect()?;
        source.close();
        assert!(source.next_frame()?.is_none());
        assert!(source.connect().is_err());
        Ok(())
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn real_devices_require_feature() {
        let config = CameraConfig {
            device: "/dev/video0".to_string(),
            ..stub_config()
        };
        assert!(CameraSource::new(config).is_err());
    }
}
