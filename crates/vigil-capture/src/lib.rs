// vigil-capture/src/lib.rs
// ============================================================
// vigil-capture  –  capture jobs and their lifecycle
// Ties camera → detector → (tracker) → archive together and runs
// each (camera, task) pair as its own long-lived worker thread.
// ------------------------------------------------------------
// Public API
//   * JobRegistry::start(camera, task)   – spawn, refuses duplicates
//   * JobRegistry::stop(camera, task)    – signal + await the join
//   * JobRegistry::status(camera, task)  – current JobStatus
//   * Preview::single_frame(camera, ..)  – one JPEG, optionally annotated
// ------------------------------------------------------------
// Workers are OS threads, not async tasks: cameras and models
// block, and their handles must stay on one thread of control.
// ============================================================

//! Vigil – capture layer
//!
//! ```no_run
//! use vigil_capture::{CaptureConfig, JobRegistry, TaskKind};
//!
//! # async fn run(config: CaptureConfig) -> Result<(), vigil_capture::JobError> {
//! let registry = JobRegistry::new(config)?;
//! registry.start("porch", TaskKind::Snapshot)?;
//! let status = registry.stop("porch", TaskKind::Snapshot).await?;
//! println!("archived {} frames", status.frames_archived);
//! # Ok(())
//! # }
//! ```

use thiserror::Error;
use vigil_archive::ArchiveError;
use vigil_camera::CameraError;
use vigil_detect::DetectError;

mod config;
mod factory;
mod job;
mod preview;
mod registry;

pub use config::CaptureConfig;
pub use factory::{DefaultFactory, PipelineFactory};
pub use job::{stop_pair, CaptureJob, JobKey, JobState, JobStatus, StopHandle, StopSignal, TaskKind};
pub use preview::Preview;
pub use registry::JobRegistry;

/// Errors raised inside a capture iteration or while preparing one.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown camera {0:?}")]
    UnknownCamera(String),
}

impl CaptureError {
    /// Errors after which no later iteration can succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            CaptureError::Camera(e) => e.is_fatal(),
            CaptureError::Detect(e) => matches!(e, DetectError::Load { .. } | DetectError::Unsupported { .. }),
            CaptureError::Archive(_) => false,
            CaptureError::Config(_) | CaptureError::UnknownCamera(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors surfaced to the job-management layer.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {}/{} is already {:?}", status.camera_id, status.task, status.state)]
    AlreadyRunning { status: Box<JobStatus> },

    #[error("no job for {key}")]
    NotFound { key: JobKey },

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("could not spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}
