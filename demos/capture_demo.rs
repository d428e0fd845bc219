//! Vigil capture demo
//!
//! Drives the capture core from a JSON config file:
//!   * `run`     – start snapshot and/or tracking jobs, stop on Ctrl-C or
//!                 after `--seconds`, print the final job statuses
//!   * `list`    – query the archive with digit filters
//!   * `summary` – per-year / month / hour / label / track-id counts
//!   * `preview` – write one (optionally annotated) JPEG
//!
//! Usage: cargo run -p demos --bin capture_demo -- --config vigil.json run --camera porch

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use vigil_archive::{Archive, ArchiveQuery, DigitFilter, GroupBy};
use vigil_capture::{CaptureConfig, JobRegistry, Preview, TaskKind};

#[derive(Parser)]
struct CliArgs {
    /// JSON capture config; defaults apply to every missing field.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Run {
        #[arg(long)]
        camera: Vec<String>,
        #[arg(long, value_enum, default_value = "snapshot")]
        task: Vec<Task>,
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        seconds: Option<u64>,
    },
    List {
        #[arg(long)]
        camera: Option<String>,
        #[arg(long, default_value = "*")]
        year: String,
        #[arg(long, default_value = "*")]
        month: String,
        #[arg(long, default_value = "*")]
        day: String,
        #[arg(long, default_value = "*")]
        hour: String,
        #[arg(long, default_value = "*")]
        minute: String,
        #[arg(long)]
        object: Option<String>,
        #[arg(long, default_value = "0")]
        page: usize,
        #[arg(long, default_value = "16")]
        page_size: usize,
    },
    Summary {
        #[arg(long)]
        camera: Option<String>,
        #[arg(long, value_enum, default_value = "label")]
        by: Group,
    },
    Preview {
        #[arg(long)]
        camera: String,
        #[arg(long)]
        detect: bool,
        #[arg(long)]
        track: bool,
        #[arg(long, default_value = "preview.jpg")]
        out: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Task {
    Snapshot,
    Tracking,
}

impl From<Task> for TaskKind {
    fn from(t: Task) -> Self {
        match t {
            Task::Snapshot => TaskKind::Snapshot,
            Task::Tracking => TaskKind::Tracking,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Group {
    Year,
    Month,
    Hour,
    Label,
    TrackId,
}

impl From<Group> for GroupBy {
    fn from(g: Group) -> Self {
        match g {
            Group::Year => GroupBy::Year,
            Group::Month => GroupBy::Month,
            Group::Hour => GroupBy::Hour,
            Group::Label => GroupBy::Label,
            Group::TrackId => GroupBy::TrackId,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<CaptureConfig> {
    let Some(path) = path else {
        return Ok(CaptureConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn run(config: CaptureConfig, cameras: Vec<String>, tasks: Vec<Task>, seconds: Option<u64>) -> Result<()> {
    let cameras = if cameras.is_empty() {
        config.cameras.iter().map(|c| c.name.clone()).collect()
    } else {
        cameras
    };
    if cameras.is_empty() {
        bail!("no cameras configured");
    }

    let registry = JobRegistry::new(config)?;
    for camera in &cameras {
        for task in &tasks {
            let status = registry.start(camera, (*task).into())?;
            println!("{}", serde_json::to_string(&status)?);
        }
    }

    match seconds {
        Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
        None => {
            tokio::signal::ctrl_c().await?;
            eprintln!("stopping…");
        }
    }

    for status in registry.shutdown().await {
        println!("{}", serde_json::to_string(&status)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = CliArgs::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Run { camera, task, seconds } => run(config, camera, task, seconds).await?,
        Command::List { camera, year, month, day, hour, minute, object, page, page_size } => {
            let archive = Archive::new(&config.archive_root);
            let q = ArchiveQuery {
                camera,
                year: DigitFilter::parse(&year)?,
                month: DigitFilter::parse(&month)?,
                day: DigitFilter::parse(&day)?,
                hour: DigitFilter::parse(&hour)?,
                minute: DigitFilter::parse(&minute)?,
                detected_object: object,
                ..ArchiveQuery::default()
            }
            .page(page, page_size);
            let total = archive.count(&q)?;
            let entries = archive.query(&q)?;
            println!("{}", serde_json::json!({ "total": total, "page": page, "entries": entries }));
        }
        Command::Summary { camera, by } => {
            let archive = Archive::new(&config.archive_root);
            let counts = archive.summarize(camera.as_deref(), by.into())?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Command::Preview { camera, detect, track, out } => {
            let mut preview = Preview::new(config)?;
            let jpeg = preview.single_frame(&camera, detect, track)?;
            std::fs::write(&out, &jpeg).with_context(|| format!("writing {}", out.display()))?;
            println!("wrote {} ({} bytes)", out.display(), jpeg.len());
        }
    }
    Ok(())
}
