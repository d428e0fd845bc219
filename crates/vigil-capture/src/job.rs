// vigil-capture/src/job.rs
// ============================================================
// One capture loop for one (camera, task) pair.
// ------------------------------------------------------------
//   snapshot : grab → detect → keep if an interesting class shows
//              up → sleep `interval` → repeat
//   tracking : grab → detect (tracking class only) → tracker
//              update → keep if a new id appeared → short sleep
// Frames are handled strictly one after another. The archive
// write is the last step of an iteration, so a stop request can
// never leave a partial file behind.
// ============================================================

use crate::{CaptureConfig, PipelineFactory, Result};
use chrono::{DateTime, Local, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use vigil_archive::{check_label, Archive};
use vigil_camera::{CameraSpec, Frame, FrameSource};
use vigil_detect::{Detection, DetectionFilter, Detector};
use vigil_track::CentroidTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Snapshot,
    Tracking,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskKind::Snapshot => "snapshot",
            TaskKind::Tracking => "tracking",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub camera_id: String,
    pub task: TaskKind,
}

impl JobKey {
    pub fn new(camera_id: impl Into<String>, task: TaskKind) -> Self {
        Self { camera_id: camera_id.into(), task }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.camera_id, self.task)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl JobState {
    /// A worker may still hold the camera.
    pub fn is_alive(&self) -> bool {
        matches!(self, JobState::Idle | JobState::Running | JobState::Stopping)
    }
}

/// What the job-management layer gets back from start/stop/status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub camera_id: String,
    pub task: TaskKind,
    pub state: JobState,
    pub running: bool,
    /// Worker thread name.
    pub handle: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub frames_processed: u64,
    pub frames_archived: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

impl JobStatus {
    pub fn new(key: &JobKey) -> Self {
        Self {
            camera_id: key.camera_id.clone(),
            task: key.task,
            state: JobState::Idle,
            running: false,
            handle: None,
            started_at: None,
            frames_processed: 0,
            frames_archived: 0,
            errors: 0,
            last_error: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.camera_id.clone(), self.task)
    }

    pub(crate) fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.running = state == JobState::Running;
    }
}

/// Status cell shared between a worker and the registry.
pub(crate) type SharedStatus = Arc<Mutex<JobStatus>>;

pub(crate) fn lock(status: &SharedStatus) -> MutexGuard<'_, JobStatus> {
    // a worker that panicked mid-update still leaves readable counters
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ------------------------------------------------------------
// stop signalling
// ------------------------------------------------------------

/// Registry side of a stop request.
#[derive(Debug)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    tx: Sender<()>,
}

/// Worker side: a sticky flag plus a channel so sleeps wake up early.
#[derive(Debug, Clone)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    rx: Receiver<()>,
}

pub fn stop_pair() -> (StopHandle, StopSignal) {
    let flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = bounded(1);
    (StopHandle { flag: flag.clone(), tx }, StopSignal { flag, rx })
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(());
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep up to `d`. Returns true when the job should end, including
    /// when the registry side has gone away.
    pub fn sleep(&self, d: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        match self.rx.recv_timeout(d) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => self.is_stopped(),
        }
    }
}

// ------------------------------------------------------------
// the job itself
// ------------------------------------------------------------

/// Owns its camera, detector and tracker for its whole life. None of them
/// is created before the first iteration.
pub struct CaptureJob {
    key: JobKey,
    camera: CameraSpec,
    config: Arc<CaptureConfig>,
    archive: Archive,
    factory: Arc<dyn PipelineFactory>,
    status: SharedStatus,
    source: Option<Box<dyn FrameSource>>,
    detector: Option<(Box<dyn Detector>, DetectionFilter)>,
    tracker: Option<CentroidTracker>,
    previous_ids: BTreeSet<u64>,
}

impl CaptureJob {
    pub(crate) fn new(
        key: JobKey,
        camera: CameraSpec,
        config: Arc<CaptureConfig>,
        factory: Arc<dyn PipelineFactory>,
        status: SharedStatus,
    ) -> Self {
        let archive = Archive::new(&config.archive_root);
        Self {
            key,
            camera,
            config,
            archive,
            factory,
            status,
            source: None,
            detector: None,
            tracker: None,
            previous_ids: BTreeSet::new(),
        }
    }

    /// Worker body. Returns when stopped or after a fatal error, which
    /// leaves the job `Failed`.
    pub fn run(mut self, stop: StopSignal) {
        let pace = match self.key.task {
            TaskKind::Snapshot => self.config.interval(),
            TaskKind::Tracking => self.config.tracking_interval(),
        };
        log::info!("job {} started", self.key);

        while !stop.is_stopped() {
            match self.step() {
                Ok(Some(path)) => {
                    log::info!("job {}: archived {}", self.key, path.display());
                    lock(&self.status).frames_archived += 1;
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    log::error!("job {} failed: {e}", self.key);
                    let mut st = lock(&self.status);
                    st.errors += 1;
                    st.last_error = Some(e.to_string());
                    st.set_state(JobState::Failed);
                    return;
                }
                Err(e) => {
                    log::warn!("job {}: iteration skipped: {e}", self.key);
                    let mut st = lock(&self.status);
                    st.errors += 1;
                    st.last_error = Some(e.to_string());
                }
            }
            if stop.sleep(pace) {
                break;
            }
        }
        log::info!("job {} leaving loop", self.key);
    }

    /// One iteration. `Some(path)` when a frame was archived.
    pub fn step(&mut self) -> Result<Option<PathBuf>> {
        self.ensure_ready()?;
        let frame = match self.source.as_mut() {
            Some(src) => src.next_frame()?,
            None => return Ok(None),
        };
        lock(&self.status).frames_processed += 1;

        match self.key.task {
            TaskKind::Snapshot => self.snapshot(&frame),
            TaskKind::Tracking => self.track(&frame),
        }
    }

    fn ensure_ready(&mut self) -> Result<()> {
        if self.source.is_none() {
            self.source = Some(self.factory.open_source(&self.camera)?);
        }
        if self.detector.is_none() {
            let detector = self.factory.build_detector(&self.config.detector)?;
            let filter = match self.key.task {
                TaskKind::Snapshot => self.config.detection_filter(detector.as_ref()),
                TaskKind::Tracking => self.config.tracking_filter(detector.as_ref())?,
            };
            self.detector = Some((detector, filter));
        }
        if self.key.task == TaskKind::Tracking && self.tracker.is_none() {
            self.tracker = Some(CentroidTracker::with_start_id(self.config.max_disappeared, self.first_track_id()));
        }
        Ok(())
    }

    fn first_track_id(&self) -> u64 {
        if !self.config.resume_track_ids {
            return 0;
        }
        match self.archive.max_track_id(&self.camera.name) {
            Ok(max) => max.map_or(0, |m| m + 1),
            Err(e) => {
                log::warn!("job {}: cannot scan archive for track ids, starting at 0: {e}", self.key);
                0
            }
        }
    }

    fn snapshot(&mut self, frame: &Frame) -> Result<Option<PathBuf>> {
        let Some((detector, filter)) = self.detector.as_mut() else {
            return Ok(None);
        };
        let dets = detector.detect(frame, filter)?;
        if !dets.iter().any(|d| self.config.is_interesting(&d.class_name)) {
            return Ok(None);
        }

        let labels = unique_labels(&dets);
        let drawn = detector.draw(frame, &dets);
        let path = self.archive.write(&self.camera.name, Local::now().naive_local(), labels.as_slice(), &[], &drawn)?;
        Ok(Some(path))
    }

    fn track(&mut self, frame: &Frame) -> Result<Option<PathBuf>> {
        let (Some((detector, filter)), Some(tracker)) = (self.detector.as_mut(), self.tracker.as_mut()) else {
            return Ok(None);
        };
        let dets = detector.detect(frame, filter)?;
        let boxes: Vec<[f32; 4]> = dets.iter().map(|d| d.bbox.as_array()).collect();
        let objects = tracker.update(&boxes);

        let current: BTreeSet<u64> = objects.keys().copied().collect();
        let fresh = current.difference(&self.previous_ids).count();
        self.previous_ids = current;
        if fresh == 0 {
            return Ok(None);
        }

        let markers: Vec<(u64, (f32, f32))> = objects.iter().map(|(&id, c)| (id, (c.x, c.y))).collect();
        let drawn = detector.annotator().draw_markers(&detector.draw(frame, &dets), &markers);
        let ids: Vec<u64> = objects.keys().copied().collect();
        let path = self.archive.write(
            &self.camera.name,
            Local::now().naive_local(),
            &[self.config.tracking_class.as_str()],
            &ids,
            &drawn,
        )?;
        Ok(Some(path))
    }
}

/// Class names in first-seen order, each once.
/// Distinct class names in first-seen order. Names the archive cannot encode
/// in a filename are left out so they never cost the whole frame.
pub(crate) fn unique_labels(dets: &[Detection]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    dets.iter()
        .filter(|d| seen.insert(d.class_name.as_str()))
        .filter(|d| match check_label(&d.class_name) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("not archiving label: {e}");
                false
            }
        })
        .map(|d| d.class_name.clone())
        .collect()
}

impl fmt::Debug for CaptureJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureJob")
            .field("key", &self.key)
            .field("camera", &self.camera.name)
            .field("source_open", &self.source.is_some())
            .field("detector_ready", &self.detector.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_detect::BBox;

    fn det(name: &str) -> Detection {
        Detection { class_id: 0, class_name: name.into(), confidence: 0.9, bbox: BBox::new(0.0, 0.0, 1.0, 1.0) }
    }

    #[test]
    fn labels_are_deduplicated_in_order() {
        let dets = [det("cat"), det("person"), det("cat")];
        assert_eq!(unique_labels(&dets), vec!["cat", "person"]);
    }

    #[test]
    fn unencodable_labels_are_dropped() {
        let dets = [det("t-shirt"), det("person"), det("hot_dog"), det("wine glass")];
        assert_eq!(unique_labels(&dets), vec!["person", "wine glass"]);
    }

    #[test]
    fn stop_wakes_a_sleeping_worker() {
        let (handle, signal) = stop_pair();
        let t = std::thread::spawn(move || signal.sleep(Duration::from_secs(60)));
        handle.stop();
        assert!(t.join().unwrap());
    }

    #[test]
    fn stop_is_sticky() {
        let (handle, signal) = stop_pair();
        handle.stop();
        handle.stop();
        assert!(signal.is_stopped());
        assert!(signal.sleep(Duration::from_millis(1)));
        assert!(signal.clone().sleep(Duration::from_millis(1)));
    }

    #[test]
    fn dropped_handle_ends_the_job() {
        let (handle, signal) = stop_pair();
        drop(handle);
        assert!(signal.sleep(Duration::from_secs(60)));
    }

    #[test]
    fn sleep_times_out_quietly() {
        let (_handle, signal) = stop_pair();
        assert!(!signal.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn status_display() {
        let key = JobKey::new("porch", TaskKind::Tracking);
        assert_eq!(key.to_string(), "porch/tracking");
        let mut st = JobStatus::new(&key);
        assert!(!st.running);
        st.set_state(JobState::Running);
        assert!(st.running && st.state.is_alive());
        st.set_state(JobState::Failed);
        assert!(!st.running && !st.state.is_alive());
        assert_eq!(st.key(), key);
    }
}
