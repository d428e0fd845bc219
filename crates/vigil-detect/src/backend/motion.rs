// vigil-detect/src/backend/motion.rs
//
// Frame differencing against a running average:
//   gray → blur → accumulate → |frame − avg| → threshold → dilate → contours
// The average is replaced by the current blurred frame after every call, so
// each prediction compares against (half of) the previous frame only.

use crate::postprocess::{decode_regions, DetectionFilter};
use crate::{
    Annotator, BBox, DetectError, Detection, Detector, Labels, MotionParams, RawOutput, Region, Result,
};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use imageproc::point::Point;
use vigil_camera::Frame;

const CLASS_NAME: &str = "motion";

pub struct MotionDetector {
    params: MotionParams,
    // (width, height, running average)
    avg: Option<(u32, u32, Vec<f32>)>,
    labels: Labels,
    annotator: Annotator,
}

impl MotionDetector {
    pub fn new(params: MotionParams, annotator: Annotator) -> Self {
        let labels = Labels::from_iter([(0, CLASS_NAME.to_string())]);
        Self { params, avg: None, labels, annotator }
    }

    /// Forget the background; the next frame becomes the new reference.
    pub fn reset(&mut self) {
        self.avg = None;
    }

    fn changed_mask(&mut self, frame: &Frame) -> GrayImage {
        let gray = image::imageops::grayscale(&frame.to_image());
        let blurred = gaussian_blur_f32(&gray, self.params.blur_sigma);
        let current: Vec<f32> = blurred.as_raw().iter().map(|v| *v as f32).collect();
        let (w, h) = blurred.dimensions();

        let mut avg = match self.avg.take() {
            Some((aw, ah, avg)) if (aw, ah) == (w, h) => avg,
            _ => current.clone(),
        };
        let alpha = self.params.alpha;
        for (a, c) in avg.iter_mut().zip(&current) {
            *a = *a * (1.0 - alpha) + c * alpha;
        }

        let thresh = self.params.delta_thresh as f32;
        let mut mask = GrayImage::new(w, h);
        for (i, (px, c)) in mask.pixels_mut().zip(&current).enumerate() {
            let reference = avg[i].round().clamp(0.0, 255.0);
            if (c - reference).abs() > thresh {
                *px = Luma([255]);
            }
        }

        self.avg = Some((w, h, current));
        mask
    }
}

/// Polygon area of a closed contour (shoelace).
fn contour_area(points: &[Point<i32>]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice.abs() as f32 / 2.0
}

fn bounding_box(points: &[Point<i32>]) -> BBox {
    let (mut x1, mut y1, mut x2, mut y2) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    for p in points {
        x1 = x1.min(p.x);
        y1 = y1.min(p.y);
        x2 = x2.max(p.x);
        y2 = y2.max(p.y);
    }
    // pixel-inclusive extent
    BBox::new(x1 as f32, y1 as f32, (x2 + 1) as f32, (y2 + 1) as f32)
}

impl Detector for MotionDetector {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn predict(&mut self, frame: &Frame) -> Result<RawOutput> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectError::InputShape {
                width: frame.width(),
                height: frame.height(),
                reason: "empty frame".into(),
            });
        }
        let mask = self.changed_mask(frame);
        let mask = dilate(&mask, Norm::LInf, self.params.dilate_radius);

        let regions = find_contours::<i32>(&mask)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|c| {
                let area = contour_area(&c.points);
                (area > self.params.min_area).then(|| Region { bbox: bounding_box(&c.points), area })
            })
            .collect();
        Ok(RawOutput::Regions(regions))
    }

    fn postprocess(&self, raw: RawOutput, frame: &Frame, filter: &DetectionFilter) -> Result<Vec<Detection>> {
        match raw {
            RawOutput::Regions(regions) => {
                Ok(decode_regions(&regions, frame.width(), frame.height(), CLASS_NAME, filter))
            }
            other => Err(DetectError::MalformedOutput(format!(
                "motion cannot decode {} model rows",
                other.len()
            ))),
        }
    }

    fn default_confidence(&self) -> f32 {
        // regions carry no score
        0.0
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn annotator(&self) -> &Annotator {
        &self.annotator
    }
}
