mod backend;
pub mod backends;
mod nms;
mod overlay;
mod params;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, StubBackend};
pub use nms::nms;
pub use overlay::{class_color, draw_detections};
pub use params::{DetectionParams, DEFAULT_CONFIDENCE, DEFAULT_IOU};
pub use registry::{build_registry, BackendRegistry, SharedDetector};
pub use result::Detection;
