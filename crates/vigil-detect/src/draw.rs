// vigil-detect/src/draw.rs
//
// Copy-on-draw overlays. Nothing here feeds back into detection
// decisions; the caller's frame is never touched.

use crate::types::Detection;
use crate::{DetectError, Result};
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::path::Path;
use vigil_camera::Frame;

const LABEL_HEIGHT: u32 = 16;
// glyph advance used for the label patch when no font is loaded
const FALLBACK_CHAR_WIDTH: u32 = 7;

/// Deterministic colour per id (golden-angle hue walk).
pub fn class_color(id: u32) -> Rgb<u8> {
    let hue = (id as f32 * 137.508) % 360.0;
    let (r, g, b) = hsv_to_rgb(hue, 0.8, 0.9);
    Rgb([r, g, b])
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator").field("font", &self.font.is_some()).finish()
    }
}

impl Annotator {
    /// Boxes and label patches only, no text.
    pub fn new() -> Self {
        Self { font: None }
    }

    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| DetectError::Font(format!("{}: {e}", path.display())))?;
        Ok(Self { font: Some(font) })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Boxes plus `"class: confidence"` labels on a copy of `frame`.
    pub fn draw(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        let mut canvas = frame.to_image();
        for det in detections {
            let color = class_color(det.class_id);
            let b = &det.bbox;
            let (x, y) = (b.x1.round() as i32, b.y1.round() as i32);
            let (w, h) = (b.width().round().max(1.0) as u32, b.height().round().max(1.0) as u32);

            // 2px border
            draw_hollow_rect_mut(&mut canvas, Rect::at(x, y).of_size(w, h), color);
            if w > 2 && h > 2 {
                draw_hollow_rect_mut(&mut canvas, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), color);
            }
            self.label(&mut canvas, x, y, &det.label(), color);
        }
        Frame::from_image(canvas).with_pts(frame.pts())
    }

    /// Filled dot and `"ID n"` at every tracked centroid.
    pub fn draw_markers(&self, frame: &Frame, markers: &[(u64, (f32, f32))]) -> Frame {
        let mut canvas = frame.to_image();
        for (id, (cx, cy)) in markers {
            let color = class_color(*id as u32);
            let (x, y) = (cx.round() as i32, cy.round() as i32);
            draw_filled_circle_mut(&mut canvas, (x, y), 4, color);
            self.label(&mut canvas, x - 10, y - 6, &format!("ID {id}"), color);
        }
        Frame::from_image(canvas).with_pts(frame.pts())
    }

    fn label(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
        let scale = PxScale::from(LABEL_HEIGHT as f32 - 2.0);
        let width = match &self.font {
            Some(font) => text_size(scale, font, text).0 + 4,
            None => text.chars().count() as u32 * FALLBACK_CHAR_WIDTH,
        };
        // keep the patch inside the image when the box touches the top edge
        let top = if y >= LABEL_HEIGHT as i32 { y - LABEL_HEIGHT as i32 } else { y };
        draw_filled_rect_mut(canvas, Rect::at(x, top).of_size(width.max(1), LABEL_HEIGHT), color);
        if let Some(font) = &self.font {
            draw_text_mut(canvas, Rgb([255, 255, 255]), x + 2, top + 1, scale, font, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;

    fn black(w: u32, h: u32) -> Frame {
        Frame::from_rgb(w, h, vec![0; (w * h * 3) as usize]).unwrap()
    }

    #[test]
    fn draw_returns_a_new_frame() {
        let frame = black(64, 64);
        let det = Detection {
            class_id: 3,
            class_name: "car".into(),
            confidence: 0.87,
            bbox: BBox::new(20.0, 30.0, 50.0, 60.0),
        };
        let drawn = Annotator::new().draw(&frame, &[det]);

        assert!(frame.as_bytes().iter().all(|b| *b == 0));
        assert_eq!(drawn.pixel(20, 45), Some(class_color(3).0));
        assert_eq!(drawn.pixel(21, 45), Some(class_color(3).0));
        assert_eq!(drawn.pixel(35, 45), Some([0, 0, 0]));
    }

    #[test]
    fn markers_land_on_centroids() {
        let frame = black(32, 32);
        let drawn = Annotator::new().draw_markers(&frame, &[(7, (16.0, 24.0))]);
        assert_eq!(drawn.pixel(16, 24), Some(class_color(7).0));
    }

    #[test]
    fn palette_is_deterministic_and_varied() {
        assert_eq!(class_color(5), class_color(5));
        assert_ne!(class_color(1), class_color(2));
    }
}
