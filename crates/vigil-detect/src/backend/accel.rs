// vigil-detect/src/backend/accel.rs
//
// MobileNet-SSD on ONNX Runtime. TensorRT is tried first, then CUDA; ort
// falls back to its CPU provider when neither is available.

use crate::postprocess::{decode_corners, DetectionFilter, SSD_ROW};
use crate::{inference_err, Annotator, DetectError, Detection, Detector, Labels, RawOutput, Result};
use ndarray::Array2;
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use vigil_camera::Frame;
use vigil_preprocess::Preprocessor;

const CONFIDENCE: f32 = 0.3;

pub struct OrtSsd {
    session: Session,
    pre: Preprocessor,
    labels: Labels,
    annotator: Annotator,
}

impl OrtSsd {
    pub fn new(model: &Path, labels: Labels, annotator: Annotator) -> Result<Self> {
        let load_err = |e: ort::Error| DetectError::Load {
            backend: "ort_ssd",
            path: model.display().to_string(),
            reason: e.to_string(),
        };
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| {
                b.with_execution_providers([
                    TensorRTExecutionProvider::default().build(),
                    CUDAExecutionProvider::default().build(),
                ])
            })
            .and_then(|b| b.commit_from_file(model))
            .map_err(load_err)?;

        Ok(Self { session, pre: Preprocessor::ssd_trt(), labels, annotator })
    }
}

impl Detector for OrtSsd {
    fn name(&self) -> &'static str {
        "ort_ssd"
    }

    fn predict(&mut self, frame: &Frame) -> Result<RawOutput> {
        let input = Tensor::from_array(self.pre.run(frame)?).map_err(inference_err)?;
        let outputs = self
            .session
            .run(ort::inputs![input].map_err(inference_err)?)
            .map_err(inference_err)?;
        let view = outputs[0].try_extract_tensor::<f32>().map_err(inference_err)?;

        if view.shape().last() != Some(&SSD_ROW) {
            return Err(DetectError::MalformedOutput(format!(
                "expected [.., {SSD_ROW}] output, got {:?}",
                view.shape()
            )));
        }
        let values: Vec<f32> = view.iter().copied().collect();
        let rows = Array2::from_shape_vec((values.len() / SSD_ROW, SSD_ROW), values)
            .map_err(|e| DetectError::MalformedOutput(e.to_string()))?;
        Ok(RawOutput::Corners(rows))
    }

    fn postprocess(&self, raw: RawOutput, frame: &Frame, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        match raw {
            RawOutput::Corners(rows) => decode_corners(&rows, frame.width(), frame.height(), &self.labels, filter),
            other => Err(DetectError::MalformedOutput(format!(
                "ort_ssd cannot decode {} non-corner rows",
                other.len()
            ))),
        }
    }

    fn default_confidence(&self) -> f32 {
        CONFIDENCE
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn annotator(&self) -> &Annotator {
        &self.annotator
    }
}
