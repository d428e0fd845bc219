// vigil-capture/src/preview.rs
use crate::{CaptureConfig, CaptureError, DefaultFactory, PipelineFactory, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use vigil_detect::Detector;
use vigil_track::CentroidTracker;

/// One-off frames for the image-browsing layer.
///
/// Opens the camera per call and does not coordinate with a running job on
/// the same camera. The detector is built on first use and kept; each camera
/// gets its own tracker so ids persist across preview calls.
pub struct Preview {
    config: Arc<CaptureConfig>,
    factory: Arc<dyn PipelineFactory>,
    detector: Option<Box<dyn Detector>>,
    trackers: BTreeMap<String, CentroidTracker>,
}

impl Preview {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        Self::with_factory(config, Arc::new(DefaultFactory))
    }

    pub fn with_factory(config: CaptureConfig, factory: Arc<dyn PipelineFactory>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config: Arc::new(config), factory, detector: None, trackers: BTreeMap::new() })
    }

    /// JPEG bytes of the next frame from `camera_id`. Tracking implies
    /// detection.
    pub fn single_frame(&mut self, camera_id: &str, apply_detection: bool, apply_tracking: bool) -> Result<Vec<u8>> {
        let camera = self
            .config
            .camera(camera_id)
            .ok_or_else(|| CaptureError::UnknownCamera(camera_id.to_string()))?;
        let frame = self.factory.open_source(camera)?.next_frame()?;

        if !apply_detection && !apply_tracking {
            return Ok(vigil_archive::encode_jpeg(&frame)?);
        }

        if self.detector.is_none() {
            self.detector = Some(self.factory.build_detector(&self.config.detector)?);
        }
        let Some(detector) = self.detector.as_mut() else {
            return Ok(vigil_archive::encode_jpeg(&frame)?);
        };

        let filter = if apply_tracking {
            self.config.tracking_filter(detector.as_ref())?
        } else {
            self.config.detection_filter(detector.as_ref())
        };
        let dets = detector.detect(&frame, &filter)?;
        let mut out = detector.draw(&frame, &dets);

        if apply_tracking {
            let max = self.config.max_disappeared;
            let tracker = self
                .trackers
                .entry(camera_id.to_string())
                .or_insert_with(|| CentroidTracker::new(max));
            let boxes: Vec<[f32; 4]> = dets.iter().map(|d| d.bbox.as_array()).collect();
            let markers: Vec<(u64, (f32, f32))> =
                tracker.update(&boxes).into_iter().map(|(id, c)| (id, (c.x, c.y))).collect();
            out = detector.annotator().draw_markers(&out, &markers);
        }

        log::debug!("preview {camera_id}: {} detections", dets.len());
        Ok(vigil_archive::encode_jpeg(&out)?)
    }
}
