// vigil-capture/src/config.rs
use crate::{CaptureError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use vigil_camera::CameraSpec;
use vigil_detect::{DetectionFilter, Detector, DetectorConfig};

/// Everything the capture core needs, already parsed by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub cameras: Vec<CameraSpec>,
    pub detector: DetectorConfig,
    pub archive_root: PathBuf,
    /// Snapshot cadence.
    pub interval_secs: u64,
    /// Pause between tracking iterations.
    pub tracking_interval_ms: u64,
    pub max_disappeared: u32,
    /// Snapshot frames are kept only if one of these shows up.
    pub interesting_classes: Vec<String>,
    /// The one class the tracking loop follows.
    pub tracking_class: String,
    /// Overrides both the detector config and the backend default.
    pub confidence: Option<f32>,
    /// Continue numbering after the highest track id already archived.
    pub resume_track_ids: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            detector: DetectorConfig::default(),
            archive_root: PathBuf::from("imgs"),
            interval_secs: 5,
            tracking_interval_ms: 100,
            max_disappeared: 50,
            interesting_classes: ["person", "bird", "cat", "wine glass", "cup", "sandwich"]
                .map(String::from)
                .to_vec(),
            tracking_class: "person".into(),
            confidence: None,
            resume_track_ids: false,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for cam in &self.cameras {
            vigil_archive::check_camera(&cam.name)
                .map_err(|_| CaptureError::Config(format!("camera name {:?} is not usable as a directory", cam.name)))?;
            if !seen.insert(cam.name.as_str()) {
                return Err(CaptureError::Config(format!("camera {:?} defined twice", cam.name)));
            }
        }
        for class in self.interesting_classes.iter().chain(std::iter::once(&self.tracking_class)) {
            vigil_archive::check_label(class)
                .map_err(|_| CaptureError::Config(format!("class {class:?} cannot be archived")))?;
        }
        if self.interval_secs == 0 {
            return Err(CaptureError::Config("interval_secs must be at least 1".into()));
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(CaptureError::Config(format!("confidence {c} outside [0, 1]")));
            }
        }
        Ok(())
    }

    pub fn camera(&self, name: &str) -> Option<&CameraSpec> {
        self.cameras.iter().find(|c| c.name == name)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn tracking_interval(&self) -> Duration {
        Duration::from_millis(self.tracking_interval_ms)
    }

    pub fn is_interesting(&self, class_name: &str) -> bool {
        self.interesting_classes.iter().any(|c| c == class_name)
    }

    /// Filter used by the snapshot loop and the preview.
    pub fn detection_filter(&self, detector: &dyn Detector) -> DetectionFilter {
        let mut filter = self.detector.filter(detector);
        if let Some(c) = self.confidence {
            filter.confidence = c;
        }
        filter
    }

    /// [`Self::detection_filter`] narrowed to the tracking class.
    pub fn tracking_filter(&self, detector: &dyn Detector) -> Result<DetectionFilter> {
        let id = detector.labels().id_of(&self.tracking_class).ok_or_else(|| {
            CaptureError::Config(format!(
                "tracking class {:?} is unknown to the {} detector",
                self.tracking_class,
                detector.name()
            ))
        })?;
        let mut filter = self.detection_filter(detector);
        filter.class_ids.clear();
        filter.class_ids.insert(id);
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_camera::DeviceKind;
    use vigil_detect::{build, DetectorKind};

    fn cam(name: &str) -> CameraSpec {
        CameraSpec::new(name, DeviceKind::Images, "frames/*.png")
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: CaptureConfig = serde_json::from_str(
            r#"{"cameras": [{"name": "porch", "device": "usb", "source": "0"}],
                "detector": {"kind": "motion"},
                "interval_secs": 10}"#,
        )
        .unwrap();
        assert_eq!(cfg.interval(), Duration::from_secs(10));
        assert_eq!(cfg.max_disappeared, 50);
        assert_eq!(cfg.tracking_class, "person");
        assert!(cfg.is_interesting("wine glass"));
        assert!(!cfg.is_interesting("car"));
        assert_eq!(cfg.archive_root, PathBuf::from("imgs"));
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_and_unsafe_camera_names() {
        let mut cfg = CaptureConfig { cameras: vec![cam("porch"), cam("porch")], ..Default::default() };
        assert!(matches!(cfg.validate(), Err(CaptureError::Config(_))));
        cfg.cameras = vec![cam("../porch")];
        assert!(cfg.validate().is_err());
        cfg.cameras = vec![cam("")];
        assert!(cfg.validate().is_err());
        cfg.cameras = vec![cam("porch"), cam("garage")];
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_unarchivable_classes() {
        let cfg = CaptureConfig { interesting_classes: vec!["hot_dog".into()], ..Default::default() };
        assert!(cfg.validate().is_err());
        let cfg = CaptureConfig { confidence: Some(1.5), ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tracking_filter_pins_the_class() {
        let det = build(&DetectorConfig::new(DetectorKind::Motion)).unwrap();
        let cfg = CaptureConfig { tracking_class: "motion".into(), confidence: Some(0.2), ..Default::default() };
        let filter = cfg.tracking_filter(det.as_ref()).unwrap();
        assert_eq!(filter.confidence, 0.2);
        assert_eq!(filter.class_ids.iter().copied().collect::<Vec<_>>(), vec![0]);

        let cfg = CaptureConfig::default();
        assert!(matches!(cfg.tracking_filter(det.as_ref()), Err(CaptureError::Config(_))));
    }
}
