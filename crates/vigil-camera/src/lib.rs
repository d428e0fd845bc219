// vigil-camera/src/lib.rs
// ============================================================
// Camera capture layer for Vigil
// Every device (USB webcam, Pi ribbon camera, Jetson CSI, raw
// GStreamer launch string, directory of stills) is hidden behind
// a single blocking "give me the next frame" call.
// ------------------------------------------------------------
// Public API:
//   * open(&CameraSpec) – build and start a FrameSource
//   * FrameSource::next_frame() – blocking pull of one RGB Frame
// ------------------------------------------------------------
// Build notes
//   * GStreamer devices need `--features gstreamer`.
//   * The `images` device works everywhere (tests, offline runs).
// ============================================================

//! Vigil – camera capture layer
//!
//! Frames are always delivered as packed RGB8 [`Frame`]s with the
//! configured [`Rotation`] already applied, so downstream stages never
//! care which device produced them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod frame;
mod still;
#[cfg(feature = "gstreamer")]
mod pipeline;

pub use frame::{Frame, Rotation};
pub use still::ImageSequence;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("failed to open camera {device}: {reason}")]
    Open { device: String, reason: String },
    #[error("camera {0} disconnected")]
    Disconnected(String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("frame buffer has {got} bytes, expected {expected}")]
    InvalidFrame { expected: usize, got: usize },
    #[error("rotation must be 0, 90, 180 or 270 degrees, got {0}")]
    InvalidRotation(u16),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Device-open and device-lost errors mean no later frame can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CameraError::Open { .. } | CameraError::Disconnected(_))
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;

/// Anything that can hand out frames one at a time.
///
/// Implementations own their device handle; they are moved into exactly one
/// capture worker and never shared.
pub trait FrameSource: Send {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Human readable description for logs.
    fn describe(&self) -> String;
}

impl FrameSource for Box<dyn FrameSource> {
    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// V4L2 webcam, `source` is the device index or path.
    Usb,
    /// Raspberry Pi ribbon camera through libcamera.
    Csi,
    /// Jetson CSI camera through nvarguscamerasrc, `source` is the sensor id.
    Jetson,
    /// Caller-supplied GStreamer launch string (without the appsink tail).
    Pipeline,
    /// Glob of still images replayed in order.
    Images,
}

/// Already-parsed camera definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSpec {
    pub name: String,
    pub device: DeviceKind,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_fps() -> u32 {
    30
}

impl CameraSpec {
    pub fn new(name: impl Into<String>, device: DeviceKind, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device,
            source: source.into(),
            rotation: Rotation::None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

/// Wraps any source and applies a fixed rotation to every frame.
pub struct Rotated<S> {
    inner: S,
    rotation: Rotation,
}

impl<S: FrameSource> Rotated<S> {
    pub fn new(inner: S, rotation: Rotation) -> Self {
        Self { inner, rotation }
    }
}

impl<S: FrameSource> FrameSource for Rotated<S> {
    fn next_frame(&mut self) -> Result<Frame> {
        let frame = self.inner.next_frame()?;
        Ok(frame.rotate(self.rotation))
    }

    fn describe(&self) -> String {
        format!("{} (rotated {}°)", self.inner.describe(), u16::from(self.rotation))
    }
}

/// Open the device described by `spec`.
///
/// ```no_run
/// use vigil_camera::{open, CameraSpec, DeviceKind};
/// let spec = CameraSpec::new("porch", DeviceKind::Usb, "0");
/// let mut cam = open(&spec).unwrap();
/// let frame = cam.next_frame().unwrap();
/// println!("{}x{}", frame.width(), frame.height());
/// ```
pub fn open(spec: &CameraSpec) -> Result<Box<dyn FrameSource>> {
    let source: Box<dyn FrameSource> = match spec.device {
        DeviceKind::Images => Box::new(ImageSequence::open(&spec.source)?),
        _ => open_gstreamer(spec)?,
    };
    log::info!("camera {} opened: {}", spec.name, source.describe());

    if spec.rotation == Rotation::None {
        Ok(source)
    } else {
        Ok(Box::new(Rotated::new(source, spec.rotation)))
    }
}

#[cfg(feature = "gstreamer")]
fn open_gstreamer(spec: &CameraSpec) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(pipeline::GstCamera::open(spec)?))
}

#[cfg(not(feature = "gstreamer"))]
fn open_gstreamer(spec: &CameraSpec) -> Result<Box<dyn FrameSource>> {
    Err(CameraError::Open {
        device: spec.name.clone(),
        reason: format!("{:?} device needs vigil-camera built with the gstreamer feature", spec.device),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults() {
        let spec: CameraSpec =
            serde_json::from_str(r#"{"name": "porch", "device": "jetson", "rotation": 180}"#).unwrap();
        assert_eq!(spec.device, DeviceKind::Jetson);
        assert_eq!(spec.rotation, Rotation::Cw180);
        assert_eq!((spec.width, spec.height, spec.fps), (640, 480, 30));
        assert_eq!(spec.source, "");
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn gstreamer_devices_fail_to_open_without_feature() {
        let spec = CameraSpec::new("porch", DeviceKind::Usb, "0");
        let err = open(&spec).err().unwrap();
        assert!(matches!(err, CameraError::Open { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn read_errors_are_not_fatal() {
        assert!(!CameraError::Read("timeout".into()).is_fatal());
        assert!(CameraError::Disconnected("porch".into()).is_fatal());
    }
}
