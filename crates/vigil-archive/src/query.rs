// vigil-archive/src/query.rs
//
// Filters over the filename index. Each filter is turned into a glob that
// over-approximates the match (per-digit character classes), and the
// parsed entries are then checked exactly.

use crate::entry::{check_camera, check_label, EXTENSION};
use crate::{ArchiveEntry, ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

pub const DEFAULT_PAGE_SIZE: usize = 16;

/// One numeric date/time component: anything, or a set of values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DigitFilter {
    #[default]
    Any,
    Values(BTreeSet<u32>),
}

impl DigitFilter {
    /// `"*"` (or empty) for any, `"7"`, `"1,3"`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(DigitFilter::Any);
        }
        s.split(',')
            .map(|v| {
                v.trim()
                    .parse::<u32>()
                    .map_err(|_| ArchiveError::InvalidFilter(format!("{s:?} is not a number list")))
            })
            .collect::<Result<BTreeSet<_>>>()
            .map(DigitFilter::Values)
    }

    pub fn value(v: u32) -> Self {
        DigitFilter::Values(BTreeSet::from([v]))
    }

    pub fn matches(&self, field: &str) -> bool {
        match self {
            DigitFilter::Any => true,
            DigitFilter::Values(set) => field.parse::<u32>().map(|v| set.contains(&v)).unwrap_or(false),
        }
    }

    /// Glob fragment covering `width` digits: `?` where unconstrained, a
    /// literal digit where every value agrees, `[..]` otherwise.
    pub fn pattern(&self, width: usize) -> Result<String> {
        let set = match self {
            DigitFilter::Any => return Ok("?".repeat(width)),
            DigitFilter::Values(set) => set,
        };
        let padded: Vec<Vec<char>> = set
            .iter()
            .map(|v| format!("{v:0width$}"))
            .map(|s| {
                if s.len() == width {
                    Ok(s.chars().collect())
                } else {
                    Err(ArchiveError::InvalidFilter(format!("{s} does not fit in {width} digits")))
                }
            })
            .collect::<Result<_>>()?;
        if padded.is_empty() {
            return Err(ArchiveError::InvalidFilter("empty value set".into()));
        }

        let mut out = String::new();
        for pos in 0..width {
            let digits: BTreeSet<char> = padded.iter().map(|p| p[pos]).collect();
            if digits.len() == 1 {
                out.extend(digits);
            } else {
                out.push('[');
                out.extend(digits);
                out.push(']');
            }
        }
        Ok(out)
    }
}

/// What to list from the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveQuery {
    pub camera: Option<String>,
    pub year: DigitFilter,
    pub month: DigitFilter,
    pub day: DigitFilter,
    pub hour: DigitFilter,
    pub minute: DigitFilter,
    pub detected_object: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for ArchiveQuery {
    fn default() -> Self {
        Self {
            camera: None,
            year: DigitFilter::Any,
            month: DigitFilter::Any,
            day: DigitFilter::Any,
            hour: DigitFilter::Any,
            minute: DigitFilter::Any,
            detected_object: None,
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ArchiveQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-based page of `page_size` entries.
    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.offset = page * page_size;
        self.limit = page_size;
        self
    }

    /// Glob over `root` that every matching entry satisfies.
    pub fn pattern(&self, root: &Path) -> Result<String> {
        let root = root
            .to_str()
            .ok_or_else(|| ArchiveError::InvalidFilter(format!("archive root {root:?} is not UTF-8")))?;
        let camera = match &self.camera {
            Some(c) => {
                check_camera(c)?;
                c.as_str()
            }
            None => "*",
        };
        let object = match &self.detected_object {
            Some(o) => {
                check_label(o)?;
                format!("*{o}*")
            }
            None => "*".to_string(),
        };
        Ok(format!(
            "{}/{}/{}{}{}/{}{}??_{}.{}",
            glob::Pattern::escape(root.trim_end_matches('/')),
            camera,
            self.year.pattern(4)?,
            self.month.pattern(2)?,
            self.day.pattern(2)?,
            self.hour.pattern(2)?,
            self.minute.pattern(2)?,
            object,
            EXTENSION,
        ))
    }

    /// Exact check of a parsed entry against every filter.
    pub fn matches(&self, e: &ArchiveEntry) -> bool {
        self.camera.as_deref().map_or(true, |c| c == e.camera)
            && self.year.matches(e.year())
            && self.month.matches(e.month())
            && self.day.matches(e.day_of_month())
            && self.hour.matches(e.hour())
            && self.minute.matches(e.minute())
            && self.detected_object.as_deref().map_or(true, |o| e.has_label(o))
    }
}

/// Key for [`crate::Archive::summarize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Year,
    /// `YYYY-MM`
    Month,
    Hour,
    Label,
    TrackId,
}

impl GroupBy {
    pub(crate) fn keys(&self, e: &ArchiveEntry) -> Vec<String> {
        match self {
            GroupBy::Year => vec![e.year().to_string()],
            GroupBy::Month => vec![format!("{}-{}", e.year(), e.month())],
            GroupBy::Hour => vec![e.hour().to_string()],
            GroupBy::Label => e.labels.clone(),
            GroupBy::TrackId => e.track_ids.iter().map(u64::to_string).collect(),
        }
    }
}
