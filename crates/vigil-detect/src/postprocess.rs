// vigil-detect/src/postprocess.rs
//
// Shared decoding of raw backend output into `Detection`s, plus the
// confidence / class filter and non-max suppression every backend uses.

use crate::labels::Labels;
use crate::types::{BBox, Detection, Region};
use crate::{DetectError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Width of one SSD output row: `[_, class, conf, x1, y1, x2, y2]`.
pub const SSD_ROW: usize = 7;

/// Which detections survive postprocessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFilter {
    /// Detections with `confidence < self.confidence` are dropped.
    pub confidence: f32,
    /// When non-empty only these class ids survive.
    #[serde(default)]
    pub class_ids: BTreeSet<u32>,
}

impl DetectionFilter {
    pub fn new(confidence: f32) -> Self {
        Self { confidence, class_ids: BTreeSet::new() }
    }

    pub fn with_classes(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.class_ids.extend(ids);
        self
    }

    pub fn accepts(&self, class_id: u32, confidence: f32) -> bool {
        // NaN never passes
        confidence >= self.confidence && (self.class_ids.is_empty() || self.class_ids.contains(&class_id))
    }
}

/// SSD style rows with normalised corners.
pub fn decode_corners(
    rows: &Array2<f32>,
    width: u32,
    height: u32,
    labels: &Labels,
    filter: &DetectionFilter,
) -> Result<Vec<Detection>> {
    if rows.nrows() > 0 && rows.ncols() != SSD_ROW {
        return Err(DetectError::MalformedOutput(format!(
            "expected {SSD_ROW} columns per detection, got {}",
            rows.ncols()
        )));
    }
    let (w, h) = (width as f32, height as f32);

    let mut out = Vec::new();
    for row in rows.rows() {
        let class_id = row[1].max(0.0) as u32;
        let confidence = row[2];
        if !filter.accepts(class_id, confidence) {
            continue;
        }
        let bbox = BBox::new(row[3] * w, row[4] * h, row[5] * w, row[6] * h).clip(w, h);
        out.push(Detection {
            class_id,
            class_name: labels.name(class_id),
            confidence,
            bbox,
        });
    }
    Ok(out)
}

/// Detection-grid rows `[cx, cy, w, h, (objectness), scores…]`.
///
/// The confidence of a row is its best class score; objectness, when the
/// layout carries one, is not folded in.
pub fn decode_grid(
    rows: &Array2<f32>,
    score_offset: usize,
    coord_scale: (f32, f32),
    width: u32,
    height: u32,
    labels: &Labels,
    filter: &DetectionFilter,
) -> Result<Vec<Detection>> {
    if rows.nrows() > 0 && rows.ncols() <= score_offset {
        return Err(DetectError::MalformedOutput(format!(
            "grid rows have {} columns, scores start at {score_offset}",
            rows.ncols()
        )));
    }
    let (w, h) = (width as f32, height as f32);
    let (sx, sy) = coord_scale;

    let mut out = Vec::new();
    for row in rows.rows() {
        let scores = row.slice(ndarray::s![score_offset..]);
        let Some((best, &confidence)) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
        else {
            continue;
        };
        let class_id = best as u32;
        if !filter.accepts(class_id, confidence) {
            continue;
        }
        let bbox = BBox::from_center(
            row[0] * sx * w,
            row[1] * sy * h,
            row[2] * sx * w,
            row[3] * sy * h,
        )
        .clip(w, h);
        out.push(Detection {
            class_id,
            class_name: labels.name(class_id),
            confidence,
            bbox,
        });
    }
    Ok(out)
}

/// Class-less regions: every region becomes class `0` named `class_name`
/// with confidence `1.0`.
pub fn decode_regions(
    regions: &[Region],
    width: u32,
    height: u32,
    class_name: &str,
    filter: &DetectionFilter,
) -> Vec<Detection> {
    if !filter.accepts(0, 1.0) {
        return Vec::new();
    }
    regions
        .iter()
        .map(|r| Detection {
            class_id: 0,
            class_name: class_name.to_string(),
            confidence: 1.0,
            bbox: r.bbox.clip(width as f32, height as f32),
        })
        .collect()
}

/// Class-agnostic NMS: highest confidence first, a box is kept only if its
/// IoU with every already-kept box is `<= iou_threshold`.
pub fn non_max_suppression(mut dets: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(dets.len());
    'outer: for d in dets {
        for k in &keep {
            if d.bbox.iou(&k.bbox) > iou_threshold {
                continue 'outer;
            }
        }
        keep.push(d);
    }
    keep
}
