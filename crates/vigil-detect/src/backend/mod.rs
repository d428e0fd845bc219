// vigil-detect/src/backend/mod.rs
//
// Concrete `Detector` implementations. Feature-gated backends pull in
// native libraries (ONNX Runtime, OpenCV).

mod motion;
mod tract;

#[cfg(feature = "ort")]
mod accel;
#[cfg(feature = "opencv")]
mod cascade;

pub use motion::MotionDetector;
pub use tract::{TractSsd, TractYolo};

#[cfg(feature = "ort")]
pub use accel::OrtSsd;
#[cfg(feature = "opencv")]
pub use cascade::CascadeDetector;
