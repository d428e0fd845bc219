// vigil-detect/src/config.rs
use crate::backend::{MotionDetector, TractSsd, TractYolo};
use crate::{Annotator, DetectError, Detector, DetectionFilter, Labels, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// MobileNet-SSD on Tract.
    Ssd,
    /// Darknet / Ultralytics detection grid on Tract.
    Yolo,
    /// MobileNet-SSD on ONNX Runtime (CUDA / TensorRT).
    OrtSsd,
    /// OpenCV Haar cascade.
    Cascade,
    /// Frame differencing.
    Motion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YoloLayout {
    /// `[N, 5 + C]` per output head, normalised boxes, objectness column.
    #[default]
    Darknet,
    /// `[1, 4 + C, N]`, boxes in input pixels, no objectness.
    Ultralytics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    /// Per-pixel difference that counts as change.
    pub delta_thresh: u8,
    /// Contours must enclose more than this many pixels.
    pub min_area: f32,
    pub blur_sigma: f32,
    pub dilate_radius: u8,
    /// Weight of the new frame in the running average.
    pub alpha: f32,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            delta_thresh: 10,
            min_area: 4000.0,
            blur_sigma: 3.5,
            dilate_radius: 2,
            alpha: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeParams {
    pub scale_factor: f64,
    pub min_neighbors: i32,
    pub min_size: i32,
    /// Class name given to every hit.
    pub label: String,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: 30,
            label: "face".into(),
        }
    }
}

/// Detector selection plus everything the backends need to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    /// ONNX model (ssd, yolo, ort_ssd) or cascade XML.
    #[serde(default)]
    pub model: Option<PathBuf>,
    /// Label table (`.json` object or one name per line).
    #[serde(default)]
    pub labels: Option<PathBuf>,
    /// Square network input for yolo.
    #[serde(default)]
    pub input_size: Option<u32>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
    #[serde(default)]
    pub class_filter: Vec<u32>,
    /// TTF used for label text; without it only boxes are drawn.
    #[serde(default)]
    pub font: Option<PathBuf>,
    #[serde(default)]
    pub yolo_layout: YoloLayout,
    #[serde(default)]
    pub motion: MotionParams,
    #[serde(default)]
    pub cascade: CascadeParams,
}

fn default_nms_threshold() -> f32 {
    0.4
}

impl DetectorConfig {
    pub fn new(kind: DetectorKind) -> Self {
        Self {
            kind,
            model: None,
            labels: None,
            input_size: None,
            confidence: None,
            nms_threshold: default_nms_threshold(),
            class_filter: Vec::new(),
            font: None,
            yolo_layout: YoloLayout::default(),
            motion: MotionParams::default(),
            cascade: CascadeParams::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<PathBuf>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Filter for `detector`: configured confidence or the backend default,
    /// plus the configured class ids.
    pub fn filter(&self, detector: &dyn Detector) -> DetectionFilter {
        DetectionFilter::new(self.confidence.unwrap_or_else(|| detector.default_confidence()))
            .with_classes(self.class_filter.iter().copied())
    }

    fn model_path(&self, backend: &'static str) -> Result<&Path> {
        self.model.as_deref().ok_or(DetectError::Load {
            backend,
            path: String::new(),
            reason: "no model path configured".into(),
        })
    }

    fn load_labels(&self, fallback: fn() -> Labels) -> Result<Labels> {
        match &self.labels {
            Some(path) => Labels::load(path),
            None => Ok(fallback()),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::new(DetectorKind::Ssd).with_model("models/ssd_mobilenet.onnx")
    }
}

/// Select and load the configured backend. Called once per worker; the
/// returned detector is never re-dispatched.
pub fn build(config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    let annotator = match &config.font {
        Some(path) => Annotator::with_font_file(path)?,
        None => Annotator::new(),
    };

    let detector: Box<dyn Detector> = match config.kind {
        DetectorKind::Ssd => Box::new(TractSsd::new(
            config.model_path("ssd")?,
            config.load_labels(Labels::coco91)?,
            annotator,
        )?),
        DetectorKind::Yolo => Box::new(TractYolo::new(
            config.model_path("yolo")?,
            config.input_size.unwrap_or(416),
            config.yolo_layout,
            config.nms_threshold,
            config.load_labels(Labels::coco80)?,
            annotator,
        )?),
        DetectorKind::OrtSsd => build_ort(config, annotator)?,
        DetectorKind::Cascade => build_cascade(config, annotator)?,
        DetectorKind::Motion => Box::new(MotionDetector::new(config.motion.clone(), annotator)),
    };

    log::info!("detector {} ready ({:?})", detector.name(), config.model);
    Ok(detector)
}

#[cfg(feature = "ort")]
fn build_ort(config: &DetectorConfig, annotator: Annotator) -> Result<Box<dyn Detector>> {
    Ok(Box::new(crate::backend::OrtSsd::new(
        config.model_path("ort_ssd")?,
        config.load_labels(Labels::coco91)?,
        annotator,
    )?))
}

#[cfg(not(feature = "ort"))]
fn build_ort(_config: &DetectorConfig, _annotator: Annotator) -> Result<Box<dyn Detector>> {
    Err(DetectError::Unsupported { backend: "ort_ssd", feature: "ort" })
}

#[cfg(feature = "opencv")]
fn build_cascade(config: &DetectorConfig, annotator: Annotator) -> Result<Box<dyn Detector>> {
    Ok(Box::new(crate::backend::CascadeDetector::new(
        config.model_path("cascade")?,
        config.cascade.clone(),
        annotator,
    )?))
}

#[cfg(not(feature = "opencv"))]
fn build_cascade(_config: &DetectorConfig, _annotator: Annotator) -> Result<Box<dyn Detector>> {
    Err(DetectError::Unsupported { backend: "cascade", feature: "opencv" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_json() {
        let cfg: DetectorConfig = serde_json::from_str(r#"{"kind": "yolo", "model": "m.onnx"}"#).unwrap();
        assert_eq!(cfg.kind, DetectorKind::Yolo);
        assert_eq!(cfg.nms_threshold, 0.4);
        assert_eq!(cfg.yolo_layout, YoloLayout::Darknet);
        assert_eq!(cfg.motion.min_area, 4000.0);
        assert_eq!(cfg.cascade.min_neighbors, 5);
    }

    #[test]
    fn missing_model_is_a_load_error() {
        let err = build(&DetectorConfig::new(DetectorKind::Ssd)).err().unwrap();
        assert!(matches!(err, DetectError::Load { backend: "ssd", .. }));
    }

    #[test]
    fn unreadable_model_is_a_load_error() {
        let cfg = DetectorConfig::new(DetectorKind::Yolo).with_model("/nonexistent/yolo.onnx");
        assert!(matches!(build(&cfg), Err(DetectError::Load { backend: "yolo", .. })));
    }

    #[test]
    fn motion_needs_no_model() {
        let det = build(&DetectorConfig::new(DetectorKind::Motion)).unwrap();
        assert_eq!(det.name(), "motion");
    }

    #[test]
    fn filter_prefers_configured_confidence() {
        let det = build(&DetectorConfig::new(DetectorKind::Motion)).unwrap();
        let mut cfg = DetectorConfig::new(DetectorKind::Motion);
        assert_eq!(cfg.filter(det.as_ref()).confidence, det.default_confidence());
        cfg.confidence = Some(0.7);
        cfg.class_filter = vec![0];
        let f = cfg.filter(det.as_ref());
        assert_eq!(f.confidence, 0.7);
        assert!(f.class_ids.contains(&0));
    }
}
