use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::nms::nms;
use crate::detect::params::DetectionParams;
use crate::detect::result::Detection;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailureMode {
    Error,
    Panic,
}

/// Stub backend for testing. Returns a fixed set of detections on every frame.
///
/// Scripted detections still pass through the confidence threshold and NMS,
/// so the stub honours the same contract as a real model.
pub struct StubBackend {
    detections: Vec<Detection>,
    fail_after: Option<(u64, FailureMode)>,
    calls: u64,
}

impl StubBackend {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            fail_after: None,
            calls: 0,
        }
    }

    /// Return an error once `successful_calls` frames have been processed.
    pub fn failing_after(mut self, successful_calls: u64) -> Self {
        self.fail_after = Some((successful_calls, FailureMode::Error));
        self
    }

    /// Panic once `successful_calls` frames have been processed.
    pub fn panicking_after(mut self, successful_calls: u64) -> Self {
        self.fail_after = Some((successful_calls, FailureMode::Panic));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, _frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>> {
        if let Some((limit, mode)) = self.fail_after {
            if self.calls >= limit {
                match mode {
                    FailureMode::Error => {
                        return Err(anyhow!("stub inference failure after {} frames", limit))
                    }
                    FailureMode::Panic => panic!("stub inference panic after {} frames", limit),
                }
            }
        }
        self.calls += 1;

        let scripted = self
            .detections
            .iter()
            .filter(|d| d.confidence >= params.confidence())
            .cloned()
            .collect();
        Ok(nms(scripted, params.iou()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, 0).unwrap()
    }

    #[test]
    fn stub_filters_by_confidence() -> Result<()> {
        let mut backend = StubBackend::new(vec![
            Detection::from_corners("particle", 0, 0.9, (0.0, 0.0), (1.0, 1.0)),
            Detection::from_corners("particle", 0, 0.1, (5.0, 5.0), (6.0, 6.0)),
        ]);
        let detections = backend.infer(&frame(), &DetectionParams::new(0.25, 0.45))?;
        assert_eq!(detections.len(), 1);
        assert_eq!(backend.calls(), 1);
        Ok(())
    }

    #[test]
    fn stub_fails_after_configured_calls() {
        let mut backend = StubBackend::default().failing_after(1);
        let params = DetectionParams::default();
        assert!(backend.infer(&frame(), &params).is_ok());
        assert!(backend.infer(&frame(), &params).is_err());
    }
}
