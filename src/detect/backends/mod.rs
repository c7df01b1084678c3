//! Wafer defect detector backends.
//!
//! - `cpu`: connected-component defect finder, always available
//! - `stub`: scripted detections for exercising the pipeline
//! - `tract`: ONNX YOLO model (feature: backend-tract)

mod cpu;
mod stub;
#[cfg(feature = "backend-tract")]
mod tract;

pub use self::cpu::{CpuBackend, PARTICLE_CLASS, SCRATCH_CLASS};
pub use self::stub::StubBackend;
#[cfg(feature = "backend-tract")]
pub use self::tract::TractBackend;
