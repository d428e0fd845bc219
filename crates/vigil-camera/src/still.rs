// vigil-camera/src/still.rs
use crate::{CameraError, Frame, FrameSource, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Replays still images matching a glob pattern, in sorted path order,
/// looping forever. Used for offline runs and tests.
pub struct ImageSequence {
    pattern: String,
    paths: Vec<PathBuf>,
    cursor: usize,
    served: u64,
}

impl ImageSequence {
    pub fn open(pattern: &str) -> Result<Self> {
        let open_err = |reason: String| CameraError::Open { device: pattern.to_string(), reason };

        let mut paths: Vec<PathBuf> = glob::glob(pattern)
            .map_err(|e| open_err(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(open_err("no images match".into()));
        }
        Ok(Self { pattern: pattern.to_string(), paths, cursor: 0, served: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Frame> {
        let path = &self.paths[self.cursor];
        self.cursor = (self.cursor + 1) % self.paths.len();
        if !path.exists() {
            return Err(CameraError::Disconnected(path.display().to_string()));
        }
        // a corrupt file costs one read, the next call moves on
        let img = image::open(path)?.to_rgb8();
        self.served += 1;
        // fake a 1 fps clock so pts stays monotonic across loops
        Ok(Frame::from_image(img).with_pts(Duration::from_secs(self.served)))
    }

    fn describe(&self) -> String {
        format!("image sequence {} ({} files)", self.pattern, self.paths.len())
    }
}
