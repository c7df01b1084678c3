#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::nms;
use crate::detect::params::DetectionParams;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// The model takes a `[1, 3, size, size]` RGB tensor scaled to 0..1 and emits
/// `[1, 4 + classes, boxes]` rows of center-format boxes followed by class
/// scores. It does not perform any network I/O or write to disk beyond model
/// loading.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    class_names: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractBackend: loaded {} ({}x{} input, {} class names)",
            model_path.display(),
            input_size,
            input_size,
            class_names.len()
        );
        Ok(Self {
            model,
            input_size,
            class_names,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = image::imageops::resize(
            &frame.to_rgb_image(),
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_id))
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &Frame,
        params: &DetectionParams,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let (rows, boxes) = (shape[1], shape[2]);
        let scale_x = frame.width as f32 / self.input_size as f32;
        let scale_y = frame.height as f32 / self.input_size as f32;

        let mut detections = Vec::new();
        for i in 0..boxes {
            let (mut best_class, mut best_score) = (0usize, f32::NEG_INFINITY);
            for c in 4..rows {
                let score = view[[0, c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c - 4;
                }
            }
            if !best_score.is_finite() || best_score < params.confidence() {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, i]] * scale_x,
                view[[0, 1, i]] * scale_y,
                view[[0, 2, i]] * scale_x,
                view[[0, 3, i]] * scale_y,
            );
            detections.push(Detection {
                label: self.class_name(best_class),
                class_id: best_class as u32,
                confidence: best_score.min(1.0),
                x: cx,
                y: cy,
                width: w,
                height: h,
            });
        }
        Ok(nms(detections, params.iou()))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, params)
    }
}
