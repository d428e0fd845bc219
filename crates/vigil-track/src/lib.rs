// vigil-track/src/lib.rs
// ============================================================
// Centroid tracker: stable object ids across frames
// ------------------------------------------------------------
// Design:
//   - Greedy nearest-pair matching on centroid distance, not an
//     optimal assignment; fine for the handful of objects one
//     camera sees, and a known accuracy limitation.
//   - Ties are broken by (object id, input index), both ascending,
//     so a fixed input order always yields the same assignment.
//   - Objects coast through `max_disappeared` missed frames and
//     are evicted on the next miss. Ids are never reused.
// ============================================================

//! Vigil – tracking layer
//!
//! ```
//! use vigil_track::CentroidTracker;
//! let mut ct = CentroidTracker::new(50);
//! let objects = ct.update(&[[0.0, 0.0, 10.0, 10.0]]);
//! assert_eq!(objects[&0].x, 5.0);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f32,
    pub y: f32,
}

impl Centroid {
    pub fn of_box(b: &[f32; 4]) -> Self {
        Self { x: (b[0] + b[2]) / 2.0, y: (b[1] + b[3]) / 2.0 }
    }

    pub fn distance(&self, other: &Centroid) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Snapshot of one live object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub object_id: u64,
    pub centroid: Centroid,
    pub disappeared: u32,
}

#[derive(Debug, Clone)]
pub struct CentroidTracker {
    next_object_id: u64,
    objects: BTreeMap<u64, Centroid>,
    disappeared: BTreeMap<u64, u32>,
    max_disappeared: u32,
}

impl CentroidTracker {
    pub fn new(max_disappeared: u32) -> Self {
        Self::with_start_id(max_disappeared, 0)
    }

    /// Resume numbering at `start_id` (e.g. one past the highest id already
    /// archived).
    pub fn with_start_id(max_disappeared: u32, start_id: u64) -> Self {
        Self {
            next_object_id: start_id,
            objects: BTreeMap::new(),
            disappeared: BTreeMap::new(),
            max_disappeared,
        }
    }

    /// Feed one frame's boxes `[x1, y1, x2, y2]`, get every live id → centroid.
    pub fn update(&mut self, boxes: &[[f32; 4]]) -> BTreeMap<u64, Centroid> {
        if boxes.is_empty() {
            let ids: Vec<u64> = self.objects.keys().copied().collect();
            for id in ids {
                self.mark_missed(id);
            }
            return self.objects.clone();
        }

        let inputs: Vec<Centroid> = boxes.iter().map(Centroid::of_box).collect();

        if self.objects.is_empty() {
            for c in inputs {
                self.register(c);
            }
            return self.objects.clone();
        }

        // every (distance, object, input) pair, smallest first
        let mut pairs: Vec<(f32, u64, usize)> = Vec::with_capacity(self.objects.len() * inputs.len());
        for (&id, c) in &self.objects {
            for (j, input) in inputs.iter().enumerate() {
                pairs.push((c.distance(input), id, j));
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut used_objects = BTreeSet::new();
        let mut used_inputs = BTreeSet::new();
        let limit = self.objects.len().min(inputs.len());
        for (_, id, j) in pairs {
            if used_objects.len() == limit {
                break;
            }
            if used_objects.contains(&id) || used_inputs.contains(&j) {
                continue;
            }
            self.objects.insert(id, inputs[j]);
            self.disappeared.insert(id, 0);
            used_objects.insert(id);
            used_inputs.insert(j);
        }

        let missed: Vec<u64> = self
            .objects
            .keys()
            .filter(|id| !used_objects.contains(*id))
            .copied()
            .collect();
        for id in missed {
            self.mark_missed(id);
        }

        for (j, c) in inputs.into_iter().enumerate() {
            if !used_inputs.contains(&j) {
                self.register(c);
            }
        }

        self.objects.clone()
    }

    fn register(&mut self, centroid: Centroid) {
        let id = self.next_object_id;
        self.next_object_id += 1;
        self.objects.insert(id, centroid);
        self.disappeared.insert(id, 0);
        log::debug!("track {id} registered at ({:.1}, {:.1})", centroid.x, centroid.y);
    }

    fn mark_missed(&mut self, id: u64) {
        let count = self.disappeared.entry(id).or_insert(0);
        *count += 1;
        if *count > self.max_disappeared {
            self.objects.remove(&id);
            self.disappeared.remove(&id);
            log::debug!("track {id} evicted");
        }
    }

    pub fn objects(&self) -> &BTreeMap<u64, Centroid> {
        &self.objects
    }

    pub fn disappeared(&self, id: u64) -> Option<u32> {
        self.disappeared.get(&id).copied()
    }

    pub fn tracked(&self) -> Vec<TrackedObject> {
        self.objects
            .iter()
            .map(|(&object_id, &centroid)| TrackedObject {
                object_id,
                centroid,
                disappeared: self.disappeared.get(&object_id).copied().unwrap_or(0),
            })
            .collect()
    }

    /// Id the next registered object will get.
    pub fn next_object_id(&self) -> u64 {
        self.next_object_id
    }

    pub fn max_disappeared(&self) -> u32 {
        self.max_disappeared
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Drop every live object. The id counter keeps counting.
    pub fn reset(&mut self) {
        self.objects.clear();
        self.disappeared.clear();
    }
}
