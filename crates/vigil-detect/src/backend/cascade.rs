// vigil-detect/src/backend/cascade.rs
//
// OpenCV Haar cascade: binary object-vs-background, every hit gets the
// configured label and confidence 1.0.

use crate::postprocess::{decode_regions, DetectionFilter};
use crate::{
    Annotator, BBox, CascadeParams, DetectError, Detection, Detector, Labels, RawOutput, Region, Result,
};
use opencv::core::{Mat, Rect, Size, Vector};
use opencv::objdetect::{CascadeClassifier, CASCADE_SCALE_IMAGE};
use opencv::prelude::*;
use std::path::Path;
use vigil_camera::Frame;

pub struct CascadeDetector {
    classifier: CascadeClassifier,
    params: CascadeParams,
    labels: Labels,
    annotator: Annotator,
}

impl CascadeDetector {
    pub fn new(model: &Path, params: CascadeParams, annotator: Annotator) -> Result<Self> {
        let load_err = |reason: String| DetectError::Load {
            backend: "cascade",
            path: model.display().to_string(),
            reason,
        };
        let classifier = CascadeClassifier::new(&model.to_string_lossy()).map_err(|e| load_err(e.to_string()))?;
        if classifier.empty().map_err(|e| load_err(e.to_string()))? {
            return Err(load_err("classifier is empty".into()));
        }
        let labels = Labels::from_iter([(0, params.label.clone())]);
        Ok(Self { classifier, params, labels, annotator })
    }
}

impl Detector for CascadeDetector {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn predict(&mut self, frame: &Frame) -> Result<RawOutput> {
        let (w, h) = (frame.width(), frame.height());
        if w == 0 || h == 0 {
            return Err(DetectError::InputShape { width: w, height: h, reason: "empty frame".into() });
        }
        let gray = image::imageops::grayscale(&frame.to_image());
        let mat: Mat = Mat::new_rows_cols_with_data(h as i32, w as i32, gray.as_raw())
            .and_then(|m| m.try_clone())
            .map_err(crate::inference_err)?;

        let mut hits = Vector::<Rect>::new();
        let min = Size::new(self.params.min_size, self.params.min_size);
        self.classifier
            .detect_multi_scale(
                &mat,
                &mut hits,
                self.params.scale_factor,
                self.params.min_neighbors,
                CASCADE_SCALE_IMAGE,
                min,
                Size::new(0, 0),
            )
            .map_err(crate::inference_err)?;

        let regions = hits
            .iter()
            .map(|r| Region {
                bbox: BBox::new(r.x as f32, r.y as f32, (r.x + r.width) as f32, (r.y + r.height) as f32),
                area: (r.width * r.height) as f32,
            })
            .collect();
        Ok(RawOutput::Regions(regions))
    }

    fn postprocess(&self, raw: RawOutput, frame: &Frame, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        match raw {
            RawOutput::Regions(regions) => {
                Ok(decode_regions(&regions, frame.width(), frame.height(), &self.params.label, filter))
            }
            other => Err(DetectError::MalformedOutput(format!(
                "cascade cannot decode {} model rows",
                other.len()
            ))),
        }
    }

    fn default_confidence(&self) -> f32 {
        0.0
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn annotator(&self) -> &Annotator {
        &self.annotator
    }
}
