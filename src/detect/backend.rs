use anyhow::Result;

use super::overlay::draw_detections;
use super::params::DetectionParams;
use super::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps an object-detection model. The pipeline treats it as a
/// black box:
/// - `infer` returns zero or more detections whose confidence is at least
///   the confidence threshold, after overlap suppression at the IoU threshold
/// - `render` returns an annotated copy of the frame; the input is untouched
///
/// Backends are loaded once per application instance and shared across runs,
/// so any per-frame state must be reset by the backend itself.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn infer(&mut self, frame: &Frame, params: &DetectionParams) -> Result<Vec<Detection>>;

    /// Draw detection overlays on a copy of `frame`.
    fn render(&self, frame: &Frame, detections: &[Detection]) -> Result<Frame> {
        Ok(draw_detections(frame, detections))
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
