// vigil-detect/src/types.rs
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, always `x1 <= x2`, `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    /// Corners in any order; they are swapped into canonical order.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    /// Clip to `[0, width] × [0, height]`.
    pub fn clip(self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// One model-reported object instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    /// `"person: 0.87"`
    pub fn label(&self) -> String {
        format!("{}: {:.2}", self.class_name, self.confidence)
    }
}

/// Class-less pixel region (motion contour, cascade hit).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub bbox: BBox,
    pub area: f32,
}

/// Backend output before filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// SSD rows `[_, class, conf, x1, y1, x2, y2]` in normalised coordinates.
    Corners(Array2<f32>),
    /// Detection-grid rows `[cx, cy, w, h, (objectness), scores…]`.
    ///
    /// `coord_scale` maps the box columns into `[0, 1]`: `(1, 1)` for
    /// normalised outputs, `(1/in_w, 1/in_h)` for outputs in input pixels.
    Grid {
        rows: Array2<f32>,
        score_offset: usize,
        coord_scale: (f32, f32),
    },
    /// Regions already in frame pixels.
    Regions(Vec<Region>),
}

impl RawOutput {
    pub fn len(&self) -> usize {
        match self {
            RawOutput::Corners(rows) => rows.nrows(),
            RawOutput::Grid { rows, .. } => rows.nrows(),
            RawOutput::Regions(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_orders_corners() {
        let b = BBox::new(10.0, 8.0, 2.0, 1.0);
        assert_eq!(b.as_array(), [2.0, 1.0, 10.0, 8.0]);
    }

    #[test]
    fn iou_of_nested_boxes() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(0.0, 0.0, 10.0, 7.0);
        assert!((a.iou(&b) - 0.7).abs() < 1e-6);
        assert_eq!(a.iou(&BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn degenerate_boxes_have_zero_iou() {
        let p = BBox::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(p.iou(&p), 0.0);
    }
}
