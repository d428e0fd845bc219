// vigil-camera/src/pipeline.rs
//
// GStreamer-backed devices. Every pipeline ends in the same tail so the
// appsink always hands us packed RGB with only the freshest buffer kept.

use crate::{CameraError, CameraSpec, DeviceKind, Frame, FrameSource, Result};
use gst::prelude::*;
use std::time::Duration;

const SINK_TAIL: &str =
    "videoconvert ! video/x-raw,format=RGB ! appsink name=sink max-buffers=1 drop=true sync=false";

// how long a pull may block before we call it a read error
const PULL_TIMEOUT_SECS: u64 = 5;

/// Build the launch string for a device, without starting anything.
pub(crate) fn launch_string(spec: &CameraSpec) -> Result<String> {
    let (w, h, f) = (spec.width, spec.height, spec.fps);
    let head = match spec.device {
        DeviceKind::Usb => {
            let device = if spec.source.starts_with('/') {
                spec.source.clone()
            } else {
                format!("/dev/video{}", if spec.source.is_empty() { "0" } else { &spec.source })
            };
            format!("v4l2src device={device} ! video/x-raw,width={w},height={h},framerate={f}/1")
        }
        DeviceKind::Csi => {
            format!("libcamerasrc ! video/x-raw,width={w},height={h},framerate={f}/1")
        }
        DeviceKind::Jetson => {
            let sensor = if spec.source.is_empty() { "0" } else { &spec.source };
            format!(
                "nvarguscamerasrc sensor-id={sensor} ! \
                 video/x-raw(memory:NVMM),width={w},height={h},format=NV12,framerate={f}/1 ! \
                 nvvidconv flip-method=0 ! video/x-raw,width={w},height={h},format=BGRx"
            )
        }
        DeviceKind::Pipeline => spec.source.clone(),
        DeviceKind::Images => {
            return Err(CameraError::Open {
                device: spec.name.clone(),
                reason: "still images are not a gstreamer device".into(),
            })
        }
    };
    Ok(format!("{head} ! {SINK_TAIL}"))
}

/// Camera handle – owns the pipeline and *appsink*.
pub struct GstCamera {
    name: String,
    launch: String,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
}

impl GstCamera {
    pub fn open(spec: &CameraSpec) -> Result<Self> {
        let open_err = |reason: String| CameraError::Open { device: spec.name.clone(), reason };

        gst::init().map_err(|e| open_err(format!("gstreamer init: {e}")))?;

        let launch = launch_string(spec)?;
        log::debug!("camera {} pipeline: {}", spec.name, launch);

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| open_err(format!("parse pipeline: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| open_err("not a gst::Pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| open_err("appsink element not found".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| open_err("appsink downcast failed".into()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| open_err(format!("set Playing: {e}")))?;

        Ok(Self { name: spec.name.clone(), launch, pipeline, appsink })
    }

    fn sample_to_frame(sample: gst::Sample) -> Result<Frame> {
        let read_err = |what: &str| CameraError::Read(what.to_string());

        let buffer = sample.buffer().ok_or_else(|| read_err("sample has no buffer"))?;
        let caps = sample.caps().ok_or_else(|| read_err("sample has no caps"))?;
        let s = caps.structure(0).ok_or_else(|| read_err("caps missing structure"))?;
        let width = s.get::<i32>("width").map_err(|e| CameraError::Read(e.to_string()))? as u32;
        let height = s.get::<i32>("height").map_err(|e| CameraError::Read(e.to_string()))? as u32;

        let pts = buffer
            .pts()
            .map(|t| Duration::from_nanos(t.nseconds()))
            .unwrap_or(Duration::ZERO);

        let map = buffer.map_readable().map_err(|e| CameraError::Read(e.to_string()))?;
        // RGB rows are padded to 4 bytes by videoconvert
        let stride = if height > 0 { (map.size() / height as usize) as u32 } else { width * 3 };
        let frame = Frame::from_strided(width, height, stride, map.as_slice())?;
        Ok(frame.with_pts(pts))
    }
}

impl FrameSource for GstCamera {
    fn next_frame(&mut self) -> Result<Frame> {
        match self
            .appsink
            .try_pull_sample(gst::ClockTime::from_seconds(PULL_TIMEOUT_SECS))
        {
            Some(sample) => Self::sample_to_frame(sample),
            None if self.appsink.is_eos() => Err(CameraError::Disconnected(self.name.clone())),
            None => Err(CameraError::Read(format!(
                "no frame from {} within {PULL_TIMEOUT_SECS}s",
                self.name
            ))),
        }
    }

    fn describe(&self) -> String {
        self.launch.clone()
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
