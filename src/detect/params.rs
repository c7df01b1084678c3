/// Default confidence threshold.
pub const DEFAULT_CONFIDENCE: f32 = 0.25;

/// Default overlap (IoU) threshold for non-maximum suppression.
pub const DEFAULT_IOU: f32 = 0.45;

/// Confidence and IoU thresholds for one run.
///
/// Both values are always within [0, 1]. A run copies its parameters at start,
/// so updates only affect the next run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionParams {
    confidence: f32,
    iou: f32,
}

impl DetectionParams {
    pub fn new(confidence: f32, iou: f32) -> Self {
        let mut params = Self::default();
        params.set_confidence(confidence);
        params.set_iou(iou);
        params
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn iou(&self) -> f32 {
        self.iou
    }

    /// Clamp into [0, 1]. NaN leaves the current value in place.
    pub fn set_confidence(&mut self, value: f32) -> f32 {
        if let Some(value) = clamp_unit(value) {
            self.confidence = value;
        }
        self.confidence
    }

    /// Clamp into [0, 1]. NaN leaves the current value in place.
    pub fn set_iou(&mut self, value: f32) -> f32 {
        if let Some(value) = clamp_unit(value) {
            self.iou = value;
        }
        self.iou
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            iou: DEFAULT_IOU,
        }
    }
}

fn clamp_unit(value: f32) -> Option<f32> {
    if value.is_nan() {
        None
    } else {
        Some(value.clamp(0.0, 1.0))
    }
}
