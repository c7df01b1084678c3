use std::collections::HashMap;

use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::nms;
use crate::detect::params::DetectionParams;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Summed absolute channel difference that separates a defect from the wafer.
const FOREGROUND_TOLERANCE: u32 = 60;

/// Longer/shorter side ratio at which a defect is reported as a scratch.
const SCRATCH_ASPECT: f32 = 3.0;

pub const PARTICLE_CLASS: u32 = 0;
pub const SCRATCH_CLASS: u32 = 1;

/// CPU backend for surface-defect detection.
///
/// The wafer background is taken as the most common colour along the frame
/// border. Pixels that differ from it are grouped into 4-connected
/// components; each component of at least `min_area` pixels is one defect.
/// Confidence is the component's fill ratio of its bounding box.
pub struct CpuBackend {
    min_area: usize,
}

impl CpuBackend {
    pub fn new(min_area: usize) -> Self {
        Self {
            min_area: min_area.max(1),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(16)
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn infer(&mut self, frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>> {
        let Some(background) = border_background(frame) else {
            return Ok(Vec::new());
        };
        let mask = foreground_mask(frame, background);
        let detections = connected_components(&mask, frame.width as usize, frame.height as usize)
            .into_iter()
            .filter(|c| c.pixels >= self.min_area)
            .map(|c| c.into_detection())
            .filter(|d| d.confidence >= params.confidence())
            .collect();
        Ok(nms(detections, params.iou()))
    }
}

fn border_background(frame: &Frame) -> Option<[u8; 3]> {
    let (w, h) = (frame.width, frame.height);
    if w == 0 || h == 0 {
        return None;
    }
    let mut counts: HashMap<[u8; 3], usize> = HashMap::new();
    let mut tally = |x: u32, y: u32| {
        if let Some(px) = frame.pixel(x, y) {
            *counts.entry(px).or_default() += 1;
        }
    };
    for x in 0..w {
        tally(x, 0);
        tally(x, h - 1);
    }
    for y in 0..h {
        tally(0, y);
        tally(w - 1, y);
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(color, _)| color)
}

fn foreground_mask(frame: &Frame, background: [u8; 3]) -> Vec<bool> {
    frame
        .pixels()
        .chunks_exact(3)
        .map(|px| {
            let diff: u32 = px
                .iter()
                .zip(background.iter())
                .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs())
                .sum();
            diff > FOREGROUND_TOLERANCE
        })
        .collect()
}

struct Component {
    pixels: usize,
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

impl Component {
    fn into_detection(self) -> Detection {
        let width = (self.max_x - self.min_x + 1) as f32;
        let height = (self.max_y - self.min_y + 1) as f32;
        let fill = (self.pixels as f32 / (width * height)).clamp(0.0, 1.0);
        let (long, short) = if width >= height {
            (width, height)
        } else {
            (height, width)
        };
        let (label, class_id) = if long >= SCRATCH_ASPECT * short {
            ("scratch", SCRATCH_CLASS)
        } else {
            ("particle", PARTICLE_CLASS)
        };
        Detection::from_corners(
            label,
            class_id,
            fill,
            (self.min_x as f32, self.min_y as f32),
            ((self.max_x + 1) as f32, (self.max_y + 1) as f32),
        )
    }
}

fn connected_components(mask: &[bool], width: usize, height: usize) -> Vec<Component> {
    let mut visited = vec![false; mask.len()];
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        let mut component = Component {
            pixels: 0,
            min_x: usize::MAX,
            min_y: usize::MAX,
            max_x: 0,
            max_y: 0,
        };

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            component.pixels += 1;
            component.min_x = component.min_x.min(x);
            component.min_y = component.min_y.min(y);
            component.max_x = component.max_x.max(x);
            component.max_y = component.max_y.max(y);

            let mut visit = |n: usize| {
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < width {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - width);
            }
            if y + 1 < height {
                visit(idx + width);
            }
        }
        components.push(component);
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(width: u32, height: u32, rects: &[(u32, u32, u32, u32)]) -> Frame {
        let mut data = vec![40u8; (width * height * 3) as usize];
        for &(x0, y0, w, h) in rects {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    let offset = ((y * width + x) * 3) as usize;
                    data[offset..offset + 3].copy_from_slice(&[220, 220, 220]);
                }
            }
        }
        Frame::new(data, width, height, 0).unwrap()
    }

    #[test]
    fn finds_particle_and_scratch() -> Result<()> {
        let frame = canvas(100, 80, &[(10, 10, 12, 12), (40, 60, 40, 4)]);
        let mut backend = CpuBackend::default();
        let detections = backend.infer(&frame, &DetectionParams::default())?;

        assert_eq!(detections.len(), 2);
        let particle = detections.iter().find(|d| d.label == "particle").unwrap();
        assert_eq!((particle.x, particle.y), (16.0, 16.0));
        assert_eq!((particle.width, particle.height), (12.0, 12.0));
        assert_eq!(particle.confidence, 1.0);
        let scratch = detections.iter().find(|d| d.label == "scratch").unwrap();
        assert_eq!(scratch.class_id, SCRATCH_CLASS);
        assert_eq!((scratch.x, scratch.y), (60.0, 62.0));
        Ok(())
    }

    #[test]
    fn small_components_are_ignored() -> Result<()> {
        let frame = canvas(50, 50, &[(5, 5, 3, 3)]);
        let mut backend = CpuBackend::default();
        assert!(backend.infer(&frame, &DetectionParams::default())?.is_empty());
        Ok(())
    }

    #[test]
    fn confidence_threshold_filters_sparse_components() -> Result<()> {
        // An L shape fills 7 of the 16 cells of its 4x4 bounding box.
        let frame = canvas(40, 40, &[(10, 10, 1, 4), (10, 13, 4, 1)]);
        let mut backend = CpuBackend::new(4);
        let low = backend.infer(&frame, &DetectionParams::new(0.25, 0.45))?;
        assert_eq!(low.len(), 1);
        assert!((low[0].confidence - 7.0 / 16.0).abs() < 1e-6);
        let high = backend.infer(&frame, &DetectionParams::new(0.5, 0.45))?;
        assert!(high.is_empty());
        Ok(())
    }

    #[test]
    fn uniform_frame_has_no_detections() -> Result<()> {
        let frame = canvas(20, 20, &[]);
        let mut backend = CpuBackend::default();
        assert!(backend.infer(&frame, &DetectionParams::default())?.is_empty());
        Ok(())
    }
}
