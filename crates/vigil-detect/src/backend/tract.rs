// vigil-detect/src/backend/tract.rs
//
// Pure-Rust CPU runtime. Models are loaded with a fixed input fact
// `[1, 3, H, W]` and optimised once at construction.

use crate::postprocess::{decode_corners, decode_grid, non_max_suppression, DetectionFilter, SSD_ROW};
use crate::{
    inference_err, Annotator, DetectError, Detection, Detector, Labels, RawOutput, Result, YoloLayout,
};
use ndarray::{Array2, Array4};
use std::path::Path;
use tract_onnx::prelude::*;
use vigil_camera::Frame;
use vigil_preprocess::Preprocessor;

type Plan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

const SSD_CONFIDENCE: f32 = 0.5;
const YOLO_CONFIDENCE: f32 = 0.5;

/// Load and optimize the ONNX model for a fixed `w × h` input.
fn load(backend: &'static str, path: &Path, w: u32, h: u32) -> Result<Plan> {
    let load_err = |e: TractError| DetectError::Load {
        backend,
        path: path.display().to_string(),
        reason: format!("{e:#}"),
    };
    tract_onnx::onnx()
        .model_for_path(path)
        .map_err(load_err)?
        .with_input_fact(0, f32::fact([1, 3, h as i32, w as i32]).into())
        .map_err(load_err)?
        .into_optimized()
        .map_err(load_err)?
        .into_runnable()
        .map_err(load_err)
}

/// Run the plan and flatten every output into `(shape, values)`.
fn run(plan: &Plan, input: &Array4<f32>) -> Result<Vec<(Vec<usize>, Vec<f32>)>> {
    let data = input
        .as_slice()
        .ok_or_else(|| DetectError::Inference("input tensor is not contiguous".into()))?;
    let tensor = Tensor::from_shape(input.shape(), data).map_err(inference_err)?;
    let outputs = plan.run(tvec!(tensor.into())).map_err(inference_err)?;

    outputs
        .iter()
        .map(|out| {
            let view = out.to_array_view::<f32>().map_err(inference_err)?;
            Ok((view.shape().to_vec(), view.iter().copied().collect()))
        })
        .collect()
}

/// MobileNet-SSD: single output `[1, 1, N, 7]` with normalised corners.
pub struct TractSsd {
    plan: Plan,
    pre: Preprocessor,
    labels: Labels,
    annotator: Annotator,
}

impl TractSsd {
    pub fn new(model: &Path, labels: Labels, annotator: Annotator) -> Result<Self> {
        let pre = Preprocessor::ssd();
        let (w, h) = pre.input_size();
        let plan = load("ssd", model, w, h)?;
        Ok(Self { plan, pre, labels, annotator })
    }
}

impl Detector for TractSsd {
    fn name(&self) -> &'static str {
        "ssd"
    }

    fn predict(&mut self, frame: &Frame) -> Result<RawOutput> {
        let input = self.pre.run(frame)?;
        let mut outputs = run(&self.plan, &input)?;
        if outputs.is_empty() {
            return Err(DetectError::MalformedOutput("model produced no outputs".into()));
        }
        let (shape, values) = outputs.swap_remove(0);
        if shape.last() != Some(&SSD_ROW) {
            return Err(DetectError::MalformedOutput(format!(
                "expected [.., {SSD_ROW}] output, got {shape:?}"
            )));
        }
        let rows = Array2::from_shape_vec((values.len() / SSD_ROW, SSD_ROW), values)
            .map_err(|e| DetectError::MalformedOutput(e.to_string()))?;
        Ok(RawOutput::Corners(rows))
    }

    fn postprocess(&self, raw: RawOutput, frame: &Frame, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        match raw {
            RawOutput::Corners(rows) => decode_corners(&rows, frame.width(), frame.height(), &self.labels, filter),
            other => Err(DetectError::MalformedOutput(format!(
                "ssd cannot decode {} non-corner rows",
                other.len()
            ))),
        }
    }

    fn default_confidence(&self) -> f32 {
        SSD_CONFIDENCE
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn annotator(&self) -> &Annotator {
        &self.annotator
    }
}

/// Detection-grid network; always followed by NMS.
pub struct TractYolo {
    plan: Plan,
    pre: Preprocessor,
    layout: YoloLayout,
    nms_threshold: f32,
    labels: Labels,
    annotator: Annotator,
}

impl TractYolo {
    pub fn new(
        model: &Path,
        input_size: u32,
        layout: YoloLayout,
        nms_threshold: f32,
        labels: Labels,
        annotator: Annotator,
    ) -> Result<Self> {
        let pre = Preprocessor::yolo(input_size);
        let plan = load("yolo", model, input_size, input_size)?;
        Ok(Self { plan, pre, layout, nms_threshold, labels, annotator })
    }

    /// Stack every `[.., N, D]` head into one `[ΣN, D]` matrix.
    fn darknet_rows(outputs: Vec<(Vec<usize>, Vec<f32>)>) -> Result<Array2<f32>> {
        let width = match outputs.first().and_then(|(shape, _)| shape.last()) {
            Some(&d) if d > 5 => d,
            _ => return Err(DetectError::MalformedOutput("darknet head narrower than 6 columns".into())),
        };
        let mut values = Vec::new();
        for (shape, v) in outputs {
            if shape.last() != Some(&width) {
                return Err(DetectError::MalformedOutput(format!(
                    "heads disagree on row width: {shape:?} vs {width}"
                )));
            }
            values.extend(v);
        }
        Array2::from_shape_vec((values.len() / width, width), values)
            .map_err(|e| DetectError::MalformedOutput(e.to_string()))
    }

    /// `[1, 4 + C, N]` transposed into `[N, 4 + C]`.
    fn ultralytics_rows(outputs: Vec<(Vec<usize>, Vec<f32>)>) -> Result<Array2<f32>> {
        let (shape, values) = outputs
            .into_iter()
            .next()
            .ok_or_else(|| DetectError::MalformedOutput("model produced no outputs".into()))?;
        let (d, n) = match shape.as_slice() {
            [1, d, n] if *d > 4 => (*d, *n),
            _ => {
                return Err(DetectError::MalformedOutput(format!(
                    "expected [1, 4+C, N] output, got {shape:?}"
                )))
            }
        };
        Ok(Array2::from_shape_fn((n, d), |(i, k)| values[k * n + i]))
    }
}

impl Detector for TractYolo {
    fn name(&self) -> &'static str {
        "yolo"
    }

    fn predict(&mut self, frame: &Frame) -> Result<RawOutput> {
        let input = self.pre.run(frame)?;
        let outputs = run(&self.plan, &input)?;
        let (in_w, in_h) = self.pre.input_size();

        Ok(match self.layout {
            YoloLayout::Darknet => RawOutput::Grid {
                rows: Self::darknet_rows(outputs)?,
                score_offset: 5,
                coord_scale: (1.0, 1.0),
            },
            YoloLayout::Ultralytics => RawOutput::Grid {
                rows: Self::ultralytics_rows(outputs)?,
                score_offset: 4,
                coord_scale: (1.0 / in_w as f32, 1.0 / in_h as f32),
            },
        })
    }

    fn postprocess(&self, raw: RawOutput, frame: &Frame, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        match raw {
            RawOutput::Grid { rows, score_offset, coord_scale } => {
                let dets = decode_grid(
                    &rows,
                    score_offset,
                    coord_scale,
                    frame.width(),
                    frame.height(),
                    &self.labels,
                    filter,
                )?;
                Ok(non_max_suppression(dets, self.nms_threshold))
            }
            other => Err(DetectError::MalformedOutput(format!(
                "yolo cannot decode {} non-grid rows",
                other.len()
            ))),
        }
    }

    fn default_confidence(&self) -> f32 {
        YOLO_CONFIDENCE
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn annotator(&self) -> &Annotator {
        &self.annotator
    }
}
