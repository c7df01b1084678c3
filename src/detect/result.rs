use serde::{Deserialize, Serialize};

/// One recognized object instance in a frame.
///
/// `x`/`y` are the box center in pixel coordinates of the frame the detection
/// was produced from; `width`/`height` are the box extent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub class_id: u32,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Detection {
    pub fn from_corners(
        label: impl Into<String>,
        class_id: u32,
        confidence: f32,
        (x1, y1): (f32, f32),
        (x2, y2): (f32, f32),
    ) -> Self {
        Self {
            label: label.into(),
            class_id,
            confidence,
            x: (x1 + x2) / 2.0,
            y: (y1 + y2) / 2.0,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    pub fn x1(&self) -> f32 {
        self.x - self.width / 2.0
    }

    pub fn y1(&self) -> f32 {
        self.y - self.height / 2.0
    }

    pub fn x2(&self) -> f32 {
        self.x + self.width / 2.0
    }

    pub fn y2(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, other: &Detection) -> f32 {
        let x1 = self.x1().max(other.x1());
        let y1 = self.y1().max(other.y1());
        let x2 = self.x2().min(other.x2());
        let y2 = self.y2().min(other.y2());

        if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        }
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// All numeric fields finite and confidence within [0, 1].
    pub fn is_well_formed(&self) -> bool {
        let finite = [self.confidence, self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        finite && (0.0..=1.0).contains(&self.confidence) && self.width >= 0.0 && self.height >= 0.0
    }
}
