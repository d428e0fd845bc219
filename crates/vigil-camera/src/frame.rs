// vigil-camera/src/frame.rs
use crate::{CameraError, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One captured RGB8 raster.
///
/// Pixels are always stored packed (`stride == width * 3`); sources that
/// hand us padded rows go through [`Frame::from_strided`]. A frame is never
/// mutated once built: overlays are drawn on a copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: u32,
    pts: Duration,
}

impl Frame {
    /// Wrap a packed RGB8 buffer.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CameraError::InvalidFrame { expected, got: data.len() });
        }
        Ok(Self { data, width, height, stride: width * 3, pts: Duration::ZERO })
    }

    /// Repack rows that carry trailing padding (GStreamer aligns to 4 bytes).
    pub fn from_strided(width: u32, height: u32, stride: u32, bytes: &[u8]) -> Result<Self> {
        let row = width as usize * 3;
        let stride = stride as usize;
        if height == 0 || stride < row || bytes.len() < stride * (height as usize - 1) + row {
            return Err(CameraError::InvalidFrame {
                expected: stride * height as usize,
                got: bytes.len(),
            });
        }
        if stride == row {
            return Self::from_rgb(width, height, bytes[..row * height as usize].to_vec());
        }
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            data.extend_from_slice(&bytes[y * stride..y * stride + row]);
        }
        Self::from_rgb(width, height, data)
    }

    pub fn from_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            stride: width * 3,
            pts: Duration::ZERO,
        }
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = pts;
        self
    }

    /// Copy into an `image` buffer (for drawing, encoding, resizing).
    pub fn to_image(&self) -> RgbImage {
        // length was validated at construction
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn pts(&self) -> Duration {
        self.pts
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.stride as usize + x as usize * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    pub fn rotate(&self, rotation: Rotation) -> Frame {
        let img = self.to_image();
        let rotated = match rotation {
            Rotation::None => return self.clone(),
            Rotation::Cw90 => image::imageops::rotate90(&img),
            Rotation::Cw180 => image::imageops::rotate180(&img),
            Rotation::Cw270 => image::imageops::rotate270(&img),
        };
        Frame::from_image(rotated).with_pts(self.pts)
    }
}

/// Fixed mounting correction applied to every frame a source produces.
///
/// Serialised as plain degrees (`0`, `90`, `180`, `270`), clockwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl TryFrom<u16> for Rotation {
    type Error = CameraError;

    fn try_from(degrees: u16) -> Result<Self> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Cw180),
            270 => Ok(Rotation::Cw270),
            other => Err(CameraError::InvalidRotation(other)),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> u16 {
        match r {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> Frame {
        let mut data = Vec::new();
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[x as u8, y as u8, 7]);
            }
        }
        Frame::from_rgb(w, h, data).unwrap()
    }

    #[test]
    fn rejects_short_buffer() {
        let err = Frame::from_rgb(4, 4, vec![0; 10]).unwrap_err();
        assert!(matches!(err, CameraError::InvalidFrame { expected: 48, got: 10 }));
    }

    #[test]
    fn strided_rows_are_repacked() {
        // 2x2 frame, rows padded to 8 bytes
        let bytes = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        let f = Frame::from_strided(2, 2, 8, &bytes).unwrap();
        assert_eq!(f.stride(), 6);
        assert_eq!(f.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let f = gradient(4, 2);
        let r = f.rotate(Rotation::Cw90);
        assert_eq!((r.width(), r.height()), (2, 4));
        // top-left of the rotated image is the old bottom-left
        assert_eq!(r.pixel(0, 0), f.pixel(0, 1));
        assert_eq!(f.rotate(Rotation::Cw180).pixel(0, 0), f.pixel(3, 1));
    }

    #[test]
    fn rotation_from_degrees() {
        let r: Rotation = serde_json::from_str("270").unwrap();
        assert_eq!(r, Rotation::Cw270);
        assert!(serde_json::from_str::<Rotation>("45").is_err());
        assert_eq!(serde_json::to_string(&Rotation::Cw90).unwrap(), "90");
    }
}
