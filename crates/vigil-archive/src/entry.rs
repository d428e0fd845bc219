// vigil-archive/src/entry.rs
//
// Filename grammar (the only index the archive has):
//
//   <root>/<camera>/<YYYYMMDD>/<HHMMSS>_<label>[-<label>…]_[<id>[-<id>…]_].jpg
//
// `_` separates fields, `-` separates list items. Both are reserved and
// rejected in labels and camera names at write time.

use crate::{ArchiveError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const EXTENSION: &str = "jpg";

const RESERVED: &[char] = &['_', '-', '/', '\\', '*', '?', '[', ']', '{', '}', '.'];

fn valid_token(s: &str) -> bool {
    !s.trim().is_empty() && !s.contains(RESERVED) && !s.chars().any(char::is_control)
}

pub fn check_camera(camera: &str) -> Result<()> {
    if valid_token(camera) {
        Ok(())
    } else {
        Err(ArchiveError::InvalidCamera(camera.to_string()))
    }
}

pub fn check_label(label: &str) -> Result<()> {
    if valid_token(label) {
        Ok(())
    } else {
        Err(ArchiveError::InvalidLabel(label.to_string()))
    }
}

/// `HHMMSS_l1-l2_[i1-i2_].jpg`
pub(crate) fn file_name<S: AsRef<str>>(time: NaiveTime, labels: &[S], track_ids: &[u64]) -> Result<String> {
    if labels.is_empty() {
        return Err(ArchiveError::InvalidLabel("no labels".into()));
    }
    for l in labels {
        check_label(l.as_ref())?;
    }
    let labels: Vec<&str> = labels.iter().map(|l| l.as_ref()).collect();
    let mut name = format!("{}_{}_", time.format("%H%M%S"), labels.join("-"));
    if !track_ids.is_empty() {
        let ids: Vec<String> = track_ids.iter().map(u64::to_string).collect();
        name.push_str(&ids.join("-"));
        name.push('_');
    }
    name.push('.');
    name.push_str(EXTENSION);
    Ok(name)
}

fn all_digits(s: &str, width: usize) -> bool {
    s.len() == width && s.bytes().all(|b| b.is_ascii_digit())
}

/// One archived frame, reconstructed purely from its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub camera: String,
    /// `YYYYMMDD`
    pub day: String,
    /// `HHMMSS`
    pub time: String,
    pub labels: Vec<String>,
    pub track_ids: Vec<u64>,
}

impl ArchiveEntry {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bad = || ArchiveError::NotAnEntry(path.to_path_buf());

        let file = path.file_name().and_then(|f| f.to_str()).ok_or_else(bad)?;
        let day_dir = path.parent().ok_or_else(bad)?;
        let day = day_dir.file_name().and_then(|f| f.to_str()).ok_or_else(bad)?;
        let camera = day_dir
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|f| f.to_str())
            .ok_or_else(bad)?;

        let stem = file
            .strip_suffix(EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .and_then(|s| s.strip_suffix('_'))
            .ok_or_else(bad)?;
        let mut fields = stem.split('_');
        let time = fields.next().ok_or_else(bad)?;
        let labels = fields.next().ok_or_else(bad)?;
        let ids = fields.next();
        if fields.next().is_some() {
            return Err(bad());
        }

        if !all_digits(day, 8) || !all_digits(time, 6) {
            return Err(bad());
        }
        NaiveDate::parse_from_str(day, "%Y%m%d").map_err(|_| bad())?;
        NaiveTime::parse_from_str(time, "%H%M%S").map_err(|_| bad())?;

        let labels: Vec<String> = labels.split('-').map(str::to_string).collect();
        if labels.iter().any(|l| l.is_empty()) {
            return Err(bad());
        }
        let track_ids = match ids {
            None => Vec::new(),
            Some(ids) => ids
                .split('-')
                .map(|id| id.parse::<u64>().map_err(|_| bad()))
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            path: path.to_path_buf(),
            camera: camera.to_string(),
            day: day.to_string(),
            time: time.to_string(),
            labels,
            track_ids,
        })
    }

    pub fn year(&self) -> &str {
        &self.day[..4]
    }

    pub fn month(&self) -> &str {
        &self.day[4..6]
    }

    pub fn day_of_month(&self) -> &str {
        &self.day[6..8]
    }

    pub fn hour(&self) -> &str {
        &self.time[..2]
    }

    pub fn minute(&self) -> &str {
        &self.time[2..4]
    }

    pub fn second(&self) -> &str {
        &self.time[4..6]
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&format!("{}{}", self.day, self.time), "%Y%m%d%H%M%S").ok()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}
