use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::result::Detection;

/// Class-aware non-maximum suppression.
///
/// Within each class, a detection is dropped when its IoU with a
/// higher-confidence kept detection exceeds `iou_threshold`. Output is sorted
/// by descending confidence.
pub fn nms(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    let mut class_groups: BTreeMap<u32, Vec<Detection>> = BTreeMap::new();
    for detection in detections {
        class_groups
            .entry(detection.class_id)
            .or_default()
            .push(detection);
    }

    let mut kept = Vec::new();
    for (_, mut group) in class_groups {
        group.sort_by(by_confidence_desc);
        let mut suppressed = vec![false; group.len()];

        for i in 0..group.len() {
            if suppressed[i] {
                continue;
            }
            for j in (i + 1)..group.len() {
                if !suppressed[j] && group[i].iou(&group[j]) > iou_threshold {
                    suppressed[j] = true;
                }
            }
        }

        kept.extend(
            group
                .into_iter()
                .zip(suppressed)
                .filter(|(_, suppressed)| !suppressed)
                .map(|(detection, _)| detection),
        );
    }

    kept.sort_by(by_confidence_desc);
    kept
}

fn by_confidence_desc(a: &Detection, b: &Detection) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, confidence: f32, x1: f32) -> Detection {
        Detection::from_corners("d", class_id, confidence, (x1, 0.0), (x1 + 10.0, 10.0))
    }

    #[test]
    fn overlapping_same_class_boxes_are_suppressed() {
        let kept = nms(vec![det(0, 0.6, 1.0), det(0, 0.9, 0.0), det(0, 0.5, 50.0)], 0.45);
        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.5]);
    }

    #[test]
    fn different_classes_do_not_suppress_each_other() {
        let kept = nms(vec![det(0, 0.9, 0.0), det(1, 0.8, 0.0)], 0.45);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn threshold_of_one_keeps_everything() {
        let kept = nms(vec![det(0, 0.9, 0.0), det(0, 0.8, 0.0)], 1.0);
        assert_eq!(kept.len(), 2);
    }
}
