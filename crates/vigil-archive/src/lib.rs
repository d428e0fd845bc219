// vigil-archive/src/lib.rs
// ============================================================
// Time-partitioned frame archive. The directory layout and the
// filename are the whole index: nothing is ever read back from
// inside a file to answer a query.
// ------------------------------------------------------------
// Layout:
//   <root>/<camera>/<YYYYMMDD>/<HHMMSS>_<labels>_[<ids>_].jpg
// Writes go through a temp file in the day directory and are
// renamed into place, so readers never see a half-written JPEG.
// ============================================================

//! Vigil – archive layer

mod entry;
mod query;

pub use entry::{check_camera, check_label, ArchiveEntry, EXTENSION};
pub use query::{ArchiveQuery, DigitFilter, GroupBy, DEFAULT_PAGE_SIZE};

use chrono::NaiveDateTime;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use vigil_camera::Frame;

pub const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid camera name {0:?}")]
    InvalidCamera(String),

    #[error("invalid label {0:?}")]
    InvalidLabel(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("{0:?} is not an archive entry")]
    NotAnEntry(PathBuf),

    #[error("{0:?} lies outside the archive root")]
    OutsideArchive(PathBuf),

    #[error("jpeg encode: {0}")]
    Encode(#[from] image::ImageError),

    #[error("bad glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Encode a frame as baseline JPEG.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let img = frame.to_image();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode(
        img.as_raw(),
        img.width(),
        img.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where an entry with these fields would live. Validates every token.
    pub fn entry_path<S: AsRef<str>>(
        &self,
        camera: &str,
        at: NaiveDateTime,
        labels: &[S],
        track_ids: &[u64],
    ) -> Result<PathBuf> {
        entry::check_camera(camera)?;
        let name = entry::file_name(at.time(), labels, track_ids)?;
        Ok(self
            .root
            .join(camera)
            .join(at.format("%Y%m%d").to_string())
            .join(name))
    }

    /// Store `frame`. A second write to the same path in the same second
    /// replaces the first.
    pub fn write<S: AsRef<str>>(
        &self,
        camera: &str,
        at: NaiveDateTime,
        labels: &[S],
        track_ids: &[u64],
        frame: &Frame,
    ) -> Result<PathBuf> {
        let path = self.entry_path(camera, at, labels, track_ids)?;
        let day_dir = path
            .parent()
            .ok_or_else(|| ArchiveError::NotAnEntry(path.clone()))?;
        std::fs::create_dir_all(day_dir)?;

        let bytes = encode_jpeg(frame)?;
        let mut tmp = tempfile::NamedTempFile::new_in(day_dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| ArchiveError::Io(e.error))?;

        log::debug!("archived {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Every entry matching `q`, in path order, paged by `q.offset`/`q.limit`.
    pub fn query(&self, q: &ArchiveQuery) -> Result<Vec<ArchiveEntry>> {
        Ok(self
            .scan(q)?
            .into_iter()
            .skip(q.offset)
            .take(q.limit)
            .collect())
    }

    /// Total number of matches, ignoring paging.
    pub fn count(&self, q: &ArchiveQuery) -> Result<usize> {
        Ok(self.scan(q)?.len())
    }

    fn scan(&self, q: &ArchiveQuery) -> Result<Vec<ArchiveEntry>> {
        let pattern = q.pattern(&self.root)?;
        let mut out = Vec::new();
        for path in glob::glob(&pattern)? {
            let path = match path {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("archive scan: {e}");
                    continue;
                }
            };
            match ArchiveEntry::from_path(&path) {
                Ok(e) if q.matches(&e) => out.push(e),
                Ok(_) => {}
                Err(_) => log::debug!("skipping foreign file {}", path.display()),
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// Entry counts per `by` key for one camera (or all).
    pub fn summarize(&self, camera: Option<&str>, by: GroupBy) -> Result<BTreeMap<String, usize>> {
        let q = ArchiveQuery { camera: camera.map(str::to_string), ..ArchiveQuery::default() };
        let mut counts = BTreeMap::new();
        for e in self.scan(&q)? {
            for key in by.keys(&e) {
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Highest track id ever archived for `camera`.
    pub fn max_track_id(&self, camera: &str) -> Result<Option<u64>> {
        let q = ArchiveQuery { camera: Some(camera.to_string()), ..ArchiveQuery::default() };
        Ok(self
            .scan(&q)?
            .iter()
            .flat_map(|e| e.track_ids.iter().copied())
            .max())
    }

    /// Delete one entry. Refuses anything that is not an entry under the root.
    pub fn remove(&self, path: &Path) -> Result<ArchiveEntry> {
        let root = self.root.canonicalize()?;
        let target = path.canonicalize()?;
        if !target.starts_with(&root) || target == root {
            return Err(ArchiveError::OutsideArchive(path.to_path_buf()));
        }
        let entry = ArchiveEntry::from_path(&target)?;
        std::fs::remove_file(&target)?;
        log::info!("removed {}", target.display());
        Ok(entry)
    }
}
