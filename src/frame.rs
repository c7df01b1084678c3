//! Decoded frame buffers.
//!
//! - `Frame`: RGB8 pixel buffer (row-major, 3 channels) plus the 0-based
//!   index the source assigned to it.
//! - `fit_within`: aspect-preserving scale into a display area.
//!
//! Two frames flow per processing step: the original produced by a
//! `FrameSource` and the annotated copy produced by a detector's `render`.

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, RgbImage};

/// Channel count of every frame (fixed R, G, B order).
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Position of this frame in its source, strictly increasing per run.
    pub index: u64,
}

impl Frame {
    /// Wrap an RGB8 buffer. Fails when the length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    pub fn from_rgb_image(image: RgbImage, index: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            index,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Copy into an `RgbImage` for drawing or encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length is checked at construction, so from_raw cannot fail here.
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn into_rgb_image(self) -> RgbImage {
        let (width, height) = (self.width, self.height);
        RgbImage::from_raw(width, height, self.data).unwrap_or_else(|| RgbImage::new(width, height))
    }

    /// RGB value at (x, y). Out-of-range coordinates return `None`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

// ----------------------------------------------------------------------------
// Display scaling
// ----------------------------------------------------------------------------

/// Largest size with the frame's aspect ratio that fits in `area_w` x `area_h`.
///
/// Never returns a zero dimension for a non-empty frame.
pub fn fit_dimensions(width: u32, height: u32, area_w: u32, area_h: u32) -> (u32, u32) {
    if width == 0 || height == 0 || area_w == 0 || area_h == 0 {
        return (0, 0);
    }
    let scale = f64::min(
        area_w as f64 / width as f64,
        area_h as f64 / height as f64,
    );
    let w = ((width as f64 * scale).round() as u32).clamp(1, area_w);
    let h = ((height as f64 * scale).round() as u32).clamp(1, area_h);
    (w, h)
}

/// Scale a frame into the display area preserving aspect ratio.
pub fn fit_within(frame: &Frame, area_w: u32, area_h: u32) -> RgbImage {
    let (w, h) = fit_dimensions(frame.width, frame.height, area_w, area_h);
    let image = frame.to_rgb_image();
    if (w, h) == (frame.width, frame.height) || w == 0 || h == 0 {
        return image;
    }
    image::imageops::resize(&image, w, h, FilterType::Triangle)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_mismatched_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 0).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, 0).is_ok());
    }

    #[test]
    fn pixel_lookup_is_row_major() -> Result<()> {
        let data = vec![
            1, 2, 3, 4, 5, 6, //
            7, 8, 9, 10, 11, 12,
        ];
        let frame = Frame::new(data, 2, 2, 0)?;
        assert_eq!(frame.pixel(1, 0), Some([4, 5, 6]));
        assert_eq!(frame.pixel(0, 1), Some([7, 8, 9]));
        assert_eq!(frame.pixel(2, 0), None);
        Ok(())
    }

    #[test]
    fn fit_preserves_aspect_ratio() {
        assert_eq!(fit_dimensions(1920, 1080, 640, 480), (640, 360));
        assert_eq!(fit_dimensions(480, 640, 640, 480), (360, 480));
        assert_eq!(fit_dimensions(100, 100, 640, 480), (480, 480));
        assert_eq!(fit_dimensions(0, 100, 640, 480), (0, 0));
    }

    #[test]
    fn fit_within_scales_image() -> Result<()> {
        let frame = Frame::new(vec![200u8; 40 * 20 * 3], 40, 20, 0)?;
        let scaled = fit_within(&frame, 10, 10);
        assert_eq!(scaled.dimensions(), (10, 5));
        Ok(())
    }
}
