// vigil-capture/src/registry.rs
// ============================================================
// JobRegistry: at most one live worker per (camera, task).
// ------------------------------------------------------------
// The check-and-insert in `start` happens under one lock, so two
// racing starts for the same key yield one worker and one
// AlreadyRunning. A stopped or failed entry stays visible to
// `status` until the key is started again.
// ============================================================

use crate::job::{lock, SharedStatus};
use crate::{
    stop_pair, CaptureConfig, CaptureError, CaptureJob, DefaultFactory, JobError, JobKey, JobState,
    JobStatus, PipelineFactory, StopHandle, TaskKind,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::watch;

type JobResult<T> = std::result::Result<T, JobError>;

struct Entry {
    status: SharedStatus,
    stop: StopHandle,
    /// Taken by the first `stop`, which reaps the thread on the blocking pool.
    worker: Option<Reaper>,
    /// Flips to true once the worker thread has been joined.
    done: watch::Receiver<bool>,
}

struct Reaper {
    thread: JoinHandle<()>,
    done: watch::Sender<bool>,
}

impl Reaper {
    /// Join the thread, settle the final state and wake every waiting `stop`.
    fn reap(self, status: &SharedStatus) {
        let joined = self.thread.join();
        let mut st = lock(status);
        if joined.is_err() {
            st.last_error = Some("worker panicked".into());
            st.set_state(JobState::Failed);
        } else if st.state == JobState::Stopping {
            st.set_state(JobState::Stopped);
        }
        drop(st);
        let _ = self.done.send(true);
    }
}

impl Entry {
    /// Status with a dead worker reconciled: a thread that is gone while the
    /// job still reads as alive exited without reporting why.
    fn snapshot(&self) -> JobStatus {
        let mut st = lock(&self.status);
        let finished = self.worker.as_ref().map_or(false, |w| w.thread.is_finished());
        if finished && matches!(st.state, JobState::Idle | JobState::Running) {
            st.last_error.get_or_insert_with(|| "worker exited unexpectedly".into());
            st.set_state(JobState::Failed);
        }
        st.clone()
    }

    /// A stop call holds the thread and has not finished joining it.
    fn joining(&self) -> bool {
        self.worker.is_none() && !*self.done.borrow()
    }
}

pub struct JobRegistry {
    config: Arc<CaptureConfig>,
    factory: Arc<dyn PipelineFactory>,
    jobs: Mutex<BTreeMap<JobKey, Entry>>,
}

impl JobRegistry {
    pub fn new(config: CaptureConfig) -> JobResult<Self> {
        Self::with_factory(config, Arc::new(DefaultFactory))
    }

    pub fn with_factory(config: CaptureConfig, factory: Arc<dyn PipelineFactory>) -> JobResult<Self> {
        config.validate()?;
        Ok(Self { config: Arc::new(config), factory, jobs: Mutex::new(BTreeMap::new()) })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn jobs(&self) -> MutexGuard<'_, BTreeMap<JobKey, Entry>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the worker for `(camera_id, task)`. Nothing is opened or
    /// loaded here; the worker does that on its first iteration.
    pub fn start(&self, camera_id: &str, task: TaskKind) -> JobResult<JobStatus> {
        let key = JobKey::new(camera_id, task);
        let camera = self
            .config
            .camera(camera_id)
            .cloned()
            .ok_or_else(|| CaptureError::UnknownCamera(camera_id.to_string()))?;

        let mut jobs = self.jobs();
        if let Some(existing) = jobs.get(&key) {
            let status = existing.snapshot();
            if status.state.is_alive() || existing.joining() {
                return Err(JobError::AlreadyRunning { status: Box::new(status) });
            }
        }
        if let Some(old) = jobs.remove(&key) {
            // finished; reap it before reusing the key
            if let Some(reaper) = old.worker {
                reaper.reap(&old.status);
            }
        }

        let thread_name = format!("vigil-{}-{}", key.camera_id, key.task);
        let mut status = JobStatus::new(&key);
        status.set_state(JobState::Running);
        status.handle = Some(thread_name.clone());
        status.started_at = Some(Utc::now());
        let shared: SharedStatus = Arc::new(Mutex::new(status.clone()));

        let (stop, signal) = stop_pair();
        let job = CaptureJob::new(key.clone(), camera, self.config.clone(), self.factory.clone(), shared.clone());
        let thread = std::thread::Builder::new().name(thread_name).spawn(move || job.run(signal))?;
        let (done_tx, done) = watch::channel(false);

        log::info!("started {key}");
        let worker = Some(Reaper { thread, done: done_tx });
        jobs.insert(key, Entry { status: shared, stop, worker, done });
        Ok(status)
    }

    /// Signal the worker and wait until it has exited and released the
    /// camera. Concurrent calls for the same key all wait for that exit.
    pub async fn stop(&self, camera_id: &str, task: TaskKind) -> JobResult<JobStatus> {
        let key = JobKey::new(camera_id, task);
        let (reaper, status, mut done) = {
            let mut jobs = self.jobs();
            let entry = jobs.get_mut(&key).ok_or_else(|| JobError::NotFound { key: key.clone() })?;
            let current = entry.snapshot();
            if current.state.is_alive() {
                lock(&entry.status).set_state(JobState::Stopping);
            }
            entry.stop.stop();
            (entry.worker.take(), entry.status.clone(), entry.done.clone())
        };

        if let Some(reaper) = reaper {
            // detached so the join completes even if this future is dropped
            let status = status.clone();
            tokio::task::spawn_blocking(move || reaper.reap(&status));
        }
        if done.wait_for(|joined| *joined).await.is_err() {
            log::warn!("stop {key}: reaper went away before the worker was joined");
        }

        let st = lock(&status).clone();
        log::info!("stopped {key} ({:?})", st.state);
        Ok(st)
    }

    pub fn status(&self, camera_id: &str, task: TaskKind) -> JobResult<JobStatus> {
        let key = JobKey::new(camera_id, task);
        self.jobs()
            .get(&key)
            .map(Entry::snapshot)
            .ok_or(JobError::NotFound { key })
    }

    /// Every known job, in key order.
    pub fn list(&self) -> Vec<JobStatus> {
        self.jobs().values().map(Entry::snapshot).collect()
    }

    /// Stop every job that is still alive.
    pub async fn shutdown(&self) -> Vec<JobStatus> {
        let keys: Vec<JobKey> = self.jobs().keys().cloned().collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match self.stop(&key.camera_id, key.task).await {
                Ok(status) => out.push(status),
                Err(e) => log::warn!("shutdown {key}: {e}"),
            }
        }
        out
    }
}

/// Dropping the registry signals every worker and joins it on the current
/// thread. Prefer `shutdown().await` from async code.
impl Drop for JobRegistry {
    fn drop(&mut self) {
        let jobs = std::mem::take(&mut *self.jobs());
        for entry in jobs.values() {
            entry.stop.stop();
        }
        for (key, entry) in jobs {
            if let Some(reaper) = entry.worker {
                reaper.reap(&entry.status);
                log::debug!("joined {key} on drop");
            }
        }
    }
}
