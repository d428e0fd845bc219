use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use vigil_archive::{Archive, ArchiveQuery};
use vigil_camera::{CameraError, CameraSpec, DeviceKind, Frame, FrameSource};
use vigil_capture::{
    CaptureConfig, JobError, JobRegistry, JobState, JobStatus, PipelineFactory, Preview, TaskKind,
};
use vigil_detect::{
    Annotator, BBox, Detection, DetectionFilter, Detector, DetectorConfig, DetectorKind, Labels, RawOutput,
};

// ------------------------------------------------------------
// scripted pipeline
// ------------------------------------------------------------

struct Still {
    glitch_every: Option<u64>,
    n: u64,
    live: Arc<AtomicUsize>,
}

impl Drop for Still {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FrameSource for Still {
    fn next_frame(&mut self) -> vigil_camera::Result<Frame> {
        self.n += 1;
        if self.glitch_every.map_or(false, |k| self.n % k == 0) {
            return Err(CameraError::Read("glitch".into()));
        }
        Frame::from_rgb(64, 48, vec![0; 64 * 48 * 3])
    }

    fn describe(&self) -> String {
        "still".into()
    }
}

struct Scripted {
    dets: Vec<Detection>,
    delay: Duration,
    labels: Labels,
    annotator: Annotator,
}

impl Detector for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn predict(&mut self, _frame: &Frame) -> vigil_detect::Result<RawOutput> {
        std::thread::sleep(self.delay);
        Ok(RawOutput::Regions(Vec::new()))
    }

    fn postprocess(
        &self,
        _raw: RawOutput,
        _frame: &Frame,
        filter: &DetectionFilter,
    ) -> vigil_detect::Result<Vec<Detection>> {
        Ok(self.dets.iter().filter(|d| filter.accepts(d.class_id, d.confidence)).cloned().collect())
    }

    fn default_confidence(&self) -> f32 {
        0.5
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn annotator(&self) -> &Annotator {
        &self.annotator
    }
}

#[derive(Default)]
struct Mock {
    dets: Vec<Detection>,
    open_fails: bool,
    glitch_every: Option<u64>,
    predict_delay: Duration,
    opened: AtomicUsize,
    built: AtomicUsize,
    /// Sources opened and not yet dropped.
    live: Arc<AtomicUsize>,
}

impl PipelineFactory for Mock {
    fn open_source(&self, camera: &CameraSpec) -> vigil_camera::Result<Box<dyn FrameSource>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.open_fails {
            return Err(CameraError::Open { device: camera.name.clone(), reason: "device busy".into() });
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Still { glitch_every: self.glitch_every, n: 0, live: self.live.clone() }))
    }

    fn build_detector(&self, _config: &DetectorConfig) -> vigil_detect::Result<Box<dyn Detector>> {
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Scripted {
            dets: self.dets.clone(),
            delay: self.predict_delay,
            labels: Labels::coco80(),
            annotator: Annotator::new(),
        }))
    }
}

fn det(class_id: u32, name: &str, confidence: f32, b: [f32; 4]) -> Detection {
    Detection { class_id, class_name: name.into(), confidence, bbox: BBox::new(b[0], b[1], b[2], b[3]) }
}

fn person() -> Detection {
    det(0, "person", 0.9, [10.0, 10.0, 30.0, 40.0])
}

fn config(root: &std::path::Path) -> CaptureConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    CaptureConfig {
        cameras: vec![
            CameraSpec::new("porch", DeviceKind::Images, "unused"),
            CameraSpec::new("gate", DeviceKind::Images, "unused"),
        ],
        detector: DetectorConfig::new(DetectorKind::Yolo),
        archive_root: root.to_path_buf(),
        interval_secs: 1,
        tracking_interval_ms: 10,
        max_disappeared: 5,
        ..Default::default()
    }
}

fn registry(root: &std::path::Path, mock: Mock) -> (Arc<JobRegistry>, Arc<Mock>) {
    let mock = Arc::new(mock);
    let reg = JobRegistry::with_factory(config(root), mock.clone()).unwrap();
    (Arc::new(reg), mock)
}

async fn wait_for(
    reg: &JobRegistry,
    camera: &str,
    task: TaskKind,
    pred: impl Fn(&JobStatus) -> bool,
) -> JobStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let st = reg.status(camera, task).unwrap();
        if pred(&st) || Instant::now() > deadline {
            return st;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ------------------------------------------------------------
// snapshot loop
// ------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_archives_interesting_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, mock) = registry(
        dir.path(),
        Mock { dets: vec![person(), det(2, "car", 0.8, [40.0, 5.0, 60.0, 20.0])], ..Default::default() },
    );

    let st = reg.start("porch", TaskKind::Snapshot).unwrap();
    assert_eq!(st.state, JobState::Running);
    assert!(st.running && st.started_at.is_some());
    assert_eq!(st.handle.as_deref(), Some("vigil-porch-snapshot"));

    let st = wait_for(&reg, "porch", TaskKind::Snapshot, |s| s.frames_archived >= 1).await;
    assert_eq!(st.frames_archived, 1);

    let st = reg.stop("porch", TaskKind::Snapshot).await.unwrap();
    assert_eq!(st.state, JobState::Stopped);
    assert!(!st.running);
    assert_eq!(mock.built.load(Ordering::SeqCst), 1);
    assert_eq!(mock.opened.load(Ordering::SeqCst), 1);

    let entries = Archive::new(dir.path()).query(&ArchiveQuery::new()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].camera, "porch");
    // every class in the frame is recorded, not only the interesting one
    assert_eq!(entries[0].labels, vec!["person", "car"]);
    assert!(entries[0].track_ids.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_skips_labels_the_archive_cannot_encode() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, _mock) = registry(
        dir.path(),
        Mock { dets: vec![det(90, "t-shirt", 0.9, [0.0, 0.0, 8.0, 8.0]), person()], ..Default::default() },
    );
    reg.start("porch", TaskKind::Snapshot).unwrap();
    let st = wait_for(&reg, "porch", TaskKind::Snapshot, |s| s.frames_archived >= 1).await;
    assert_eq!(st.errors, 0);
    reg.stop("porch", TaskKind::Snapshot).await.unwrap();

    let entries = Archive::new(dir.path()).query(&ArchiveQuery::new()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].labels, vec!["person"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_discards_boring_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, _mock) = registry(
        dir.path(),
        Mock { dets: vec![det(2, "car", 0.8, [0.0, 0.0, 10.0, 10.0])], ..Default::default() },
    );
    reg.start("porch", TaskKind::Snapshot).unwrap();
    wait_for(&reg, "porch", TaskKind::Snapshot, |s| s.frames_processed >= 1).await;
    let st = reg.stop("porch", TaskKind::Snapshot).await.unwrap();
    assert!(st.frames_processed >= 1);
    assert_eq!(st.frames_archived, 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

// ------------------------------------------------------------
// tracking loop
// ------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn tracking_archives_only_new_identities() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, _mock) = registry(
        dir.path(),
        Mock { dets: vec![person(), det(15, "cat", 0.9, [40.0, 5.0, 60.0, 20.0])], ..Default::default() },
    );
    reg.start("gate", TaskKind::Tracking).unwrap();
    let st = wait_for(&reg, "gate", TaskKind::Tracking, |s| s.frames_processed >= 6).await;
    assert!(st.frames_processed >= 6);
    let st = reg.stop("gate", TaskKind::Tracking).await.unwrap();
    assert_eq!(st.frames_archived, 1);

    let entries = Archive::new(dir.path()).query(&ArchiveQuery::new()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].labels, vec!["person"]);
    // the cat is filtered out before the tracker ever sees it
    assert_eq!(entries[0].track_ids, vec![0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn tracking_resumes_numbering_from_the_archive() {
    let dir = tempfile::tempdir().unwrap();
    let old = NaiveDateTime::parse_from_str("20200101 000000", "%Y%m%d %H%M%S").unwrap();
    let blank = Frame::from_rgb(4, 4, vec![0; 48]).unwrap();
    Archive::new(dir.path()).write("gate", old, &["person"], &[3, 7], &blank).unwrap();

    let mock = Arc::new(Mock { dets: vec![person()], ..Default::default() });
    let cfg = CaptureConfig { resume_track_ids: true, ..config(dir.path()) };
    let reg = JobRegistry::with_factory(cfg, mock).unwrap();

    reg.start("gate", TaskKind::Tracking).unwrap();
    wait_for(&reg, "gate", TaskKind::Tracking, |s| s.frames_archived >= 1).await;
    reg.stop("gate", TaskKind::Tracking).await.unwrap();

    let archive = Archive::new(dir.path());
    assert_eq!(archive.max_track_id("gate").unwrap(), Some(8));
}

// ------------------------------------------------------------
// error policy
// ------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn camera_open_failure_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, mock) = registry(dir.path(), Mock { open_fails: true, ..Default::default() });

    reg.start("porch", TaskKind::Snapshot).unwrap();
    let st = wait_for(&reg, "porch", TaskKind::Snapshot, |s| s.state == JobState::Failed).await;
    assert_eq!(st.state, JobState::Failed);
    assert!(!st.running);
    assert!(st.last_error.unwrap().contains("device busy"));
    assert_eq!(mock.built.load(Ordering::SeqCst), 0);

    // a failed job never comes back by itself, but the key can be reused
    let again = reg.start("porch", TaskKind::Snapshot).unwrap();
    assert_eq!(again.state, JobState::Running);
    assert_eq!(again.errors, 0);
    wait_for(&reg, "porch", TaskKind::Snapshot, |s| s.state == JobState::Failed).await;
    let st = reg.stop("porch", TaskKind::Snapshot).await.unwrap();
    assert_eq!(st.state, JobState::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_errors_skip_the_iteration_only() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, _mock) = registry(dir.path(), Mock { glitch_every: Some(2), ..Default::default() });

    reg.start("gate", TaskKind::Tracking).unwrap();
    let st = wait_for(&reg, "gate", TaskKind::Tracking, |s| s.errors >= 2 && s.frames_processed >= 2).await;
    assert_eq!(st.state, JobState::Running);
    assert_eq!(st.last_error.as_deref(), Some("failed to read frame: glitch"));
    reg.stop("gate", TaskKind::Tracking).await.unwrap();
}

// ------------------------------------------------------------
// registry contract
// ------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts_yield_one_worker() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, _mock) = registry(dir.path(), Mock::default());

    let spawn = |reg: Arc<JobRegistry>| tokio::spawn(async move { reg.start("porch", TaskKind::Snapshot) });
    let (a, b) = tokio::join!(spawn(reg.clone()), spawn(reg.clone()));
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let dup = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    match dup {
        JobError::AlreadyRunning { status } => assert_eq!(status.state, JobState::Running),
        other => panic!("unexpected {other}"),
    }
    assert_eq!(reg.list().len(), 1);

    // other tasks on the same camera are separate keys
    reg.start("porch", TaskKind::Tracking).unwrap();
    assert_eq!(reg.list().len(), 2);
    let stopped = reg.shutdown().await;
    assert!(stopped.iter().all(|s| s.state == JobState::Stopped));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_keys() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, _mock) = registry(dir.path(), Mock::default());

    assert!(matches!(reg.status("porch", TaskKind::Snapshot), Err(JobError::NotFound { .. })));
    assert!(matches!(reg.stop("porch", TaskKind::Tracking).await, Err(JobError::NotFound { .. })));
    assert!(matches!(reg.start("attic", TaskKind::Snapshot), Err(JobError::Capture(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_then_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, mock) = registry(dir.path(), Mock::default());

    reg.start("porch", TaskKind::Snapshot).unwrap();
    let st = reg.stop("porch", TaskKind::Snapshot).await.unwrap();
    assert_eq!(st.state, JobState::Stopped);
    assert_eq!(reg.status("porch", TaskKind::Snapshot).unwrap().state, JobState::Stopped);

    // stopping twice is harmless
    assert_eq!(reg.stop("porch", TaskKind::Snapshot).await.unwrap().state, JobState::Stopped);

    reg.start("porch", TaskKind::Snapshot).unwrap();
    wait_for(&reg, "porch", TaskKind::Snapshot, |s| s.frames_processed >= 1).await;
    reg.stop("porch", TaskKind::Snapshot).await.unwrap();
    // a fresh job builds its own detector
    assert!(mock.built.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_stops_wait_for_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, mock) = registry(
        dir.path(),
        Mock { dets: vec![person()], predict_delay: Duration::from_millis(800), ..Default::default() },
    );

    reg.start("porch", TaskKind::Snapshot).unwrap();
    // give the worker time to open the camera and enter inference
    wait_for(&reg, "porch", TaskKind::Snapshot, |_| mock.built.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.live.load(Ordering::SeqCst), 1);

    let (a, b) = tokio::join!(reg.stop("porch", TaskKind::Snapshot), reg.stop("porch", TaskKind::Snapshot));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.state, JobState::Stopped);
    assert_eq!(b.state, JobState::Stopped);
    // both calls return only after the worker released the camera
    assert_eq!(mock.live.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn key_is_busy_until_the_stop_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, mock) = registry(
        dir.path(),
        Mock { dets: vec![person()], predict_delay: Duration::from_millis(500), ..Default::default() },
    );

    reg.start("gate", TaskKind::Tracking).unwrap();
    wait_for(&reg, "gate", TaskKind::Tracking, |_| mock.built.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopping = {
        let reg = reg.clone();
        tokio::spawn(async move { reg.stop("gate", TaskKind::Tracking).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(reg.start("gate", TaskKind::Tracking), Err(JobError::AlreadyRunning { .. })));

    assert_eq!(stopping.await.unwrap().unwrap().state, JobState::Stopped);
    assert_eq!(mock.live.load(Ordering::SeqCst), 0);
    reg.start("gate", TaskKind::Tracking).unwrap();
    reg.stop("gate", TaskKind::Tracking).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_registry_joins_its_workers() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, mock) = registry(
        dir.path(),
        Mock { dets: vec![person()], predict_delay: Duration::from_millis(300), ..Default::default() },
    );
    reg.start("porch", TaskKind::Snapshot).unwrap();
    reg.start("gate", TaskKind::Tracking).unwrap();
    wait_for(&reg, "porch", TaskKind::Snapshot, |_| mock.live.load(Ordering::SeqCst) == 2).await;

    drop(reg);
    assert_eq!(mock.live.load(Ordering::SeqCst), 0);
}

#[test]
fn invalid_config_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.cameras.push(CameraSpec::new("porch", DeviceKind::Usb, "1"));
    assert!(matches!(JobRegistry::with_factory(cfg, Arc::new(Mock::default())), Err(JobError::Capture(_))));
}

// ------------------------------------------------------------
// preview
// ------------------------------------------------------------

#[test]
fn preview_frames_are_jpeg() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mock = Arc::new(Mock { dets: vec![person()], ..Default::default() });
    let mut preview = Preview::with_factory(config(dir.path()), mock.clone())?;

    let raw = preview.single_frame("porch", false, false)?;
    let img = image::load_from_memory(&raw)?;
    assert_eq!((img.width(), img.height()), (64, 48));
    assert_eq!(mock.built.load(Ordering::SeqCst), 0);

    let annotated = preview.single_frame("porch", true, false)?;
    assert_ne!(annotated, raw);
    let tracked = preview.single_frame("porch", false, true)?;
    assert!(image::load_from_memory(&tracked).is_ok());
    // detector is built once and reused
    assert_eq!(mock.built.load(Ordering::SeqCst), 1);
    assert_eq!(mock.opened.load(Ordering::SeqCst), 3);

    assert!(preview.single_frame("attic", false, false).is_err());
    Ok(())
}
