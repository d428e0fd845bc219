// vigil-detect/src/lib.rs
// ============================================================
// vigil-detect  –  Object-detection stage for Vigil
// One `Detector` contract over several very different backends:
// SSD and YOLO networks on Tract (pure Rust), SSD on ONNX Runtime
// with CUDA/TensorRT (optional feature), OpenCV Haar cascades
// (optional feature) and a frame-differencing motion detector.
// ------------------------------------------------------------
// Pipeline: Frame → predict → RawOutput → postprocess → Vec<Detection>
// ------------------------------------------------------------
// Public API
//   * build(&DetectorConfig)        – pick + load a backend once
//   * Detector::detect(frame, filt) – predict + postprocess
//   * Detector::draw(frame, dets)   – annotated copy of the frame
// ------------------------------------------------------------
//   Build notes
//     * Default backends (ssd, yolo, motion) have no C deps.
//     * `--features ort` enables ort_ssd, `--features opencv` cascade.
// ============================================================

//! Vigil – detection layer
//!
//! Every backend normalises its output into the same [`Detection`] record
//! (pixel-space corner box, class id + name, confidence). Filtering by
//! confidence and class happens in postprocess; detection-grid networks
//! additionally run class-agnostic [`non_max_suppression`].

use std::time::Instant;
use thiserror::Error;
use vigil_camera::Frame;
use vigil_preprocess::PreprocessError;

pub mod backend;
mod config;
mod draw;
mod labels;
mod postprocess;
mod types;

pub use config::{build, CascadeParams, DetectorConfig, DetectorKind, MotionParams, YoloLayout};
pub use draw::{class_color, Annotator};
pub use labels::Labels;
pub use postprocess::{
    decode_corners, decode_grid, decode_regions, non_max_suppression, DetectionFilter, SSD_ROW,
};
pub use types::{BBox, Detection, RawOutput, Region};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to load {backend} model {path}: {reason}")]
    Load {
        backend: &'static str,
        path: String,
        reason: String,
    },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("frame {width}x{height} cannot be fed to the model: {reason}")]
    InputShape {
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("malformed model output: {0}")]
    MalformedOutput(String),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("invalid labels: {0}")]
    Labels(String),
    #[error("invalid font: {0}")]
    Font(String),
    #[error("{backend} backend not compiled in (enable the `{feature}` feature)")]
    Unsupported {
        backend: &'static str,
        feature: &'static str,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DetectError>;

pub(crate) fn inference_err(e: impl std::fmt::Display) -> DetectError {
    DetectError::Inference(e.to_string())
}

/// Trait for object detectors.
///
/// A detector owns native model state and is driven by exactly one worker,
/// hence `Send` but not `Sync`, and `predict` takes `&mut self`.
pub trait Detector: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Run the backend on one frame.
    fn predict(&mut self, frame: &Frame) -> Result<RawOutput>;

    /// Turn raw output into filtered pixel-space detections.
    fn postprocess(
        &self,
        raw: RawOutput,
        frame: &Frame,
        filter: &DetectionFilter,
    ) -> Result<Vec<Detection>>;

    /// Confidence floor used when the caller does not pick one.
    fn default_confidence(&self) -> f32;

    fn labels(&self) -> &Labels;

    fn annotator(&self) -> &Annotator;

    /// Annotated copy of `frame`; the input is left untouched.
    fn draw(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        self.annotator().draw(frame, detections)
    }

    fn detect(&mut self, frame: &Frame, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        let t0 = Instant::now();
        let raw = self.predict(frame)?;
        let t1 = Instant::now();
        let dets = self.postprocess(raw, frame, filter)?;
        log::debug!(
            "{}: predict {:.1?}, postprocess {:.1?}, {} detections",
            self.name(),
            t1 - t0,
            t1.elapsed(),
            dets.len()
        );
        Ok(dets)
    }
}
