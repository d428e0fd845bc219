// vigil-capture/src/factory.rs
use vigil_camera::{CameraSpec, FrameSource};
use vigil_detect::{Detector, DetectorConfig};

/// Builds the native handles a job owns. Every job calls this from its own
/// worker, so nothing built here is ever shared.
pub trait PipelineFactory: Send + Sync {
    fn open_source(&self, camera: &CameraSpec) -> vigil_camera::Result<Box<dyn FrameSource>>;

    fn build_detector(&self, config: &DetectorConfig) -> vigil_detect::Result<Box<dyn Detector>>;
}

/// Real devices and models.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFactory;

impl PipelineFactory for DefaultFactory {
    fn open_source(&self, camera: &CameraSpec) -> vigil_camera::Result<Box<dyn FrameSource>> {
        vigil_camera::open(camera)
    }

    fn build_detector(&self, config: &DetectorConfig) -> vigil_detect::Result<Box<dyn Detector>> {
        vigil_detect::build(config)
    }
}
