//! vigil‑preprocess – resize + normalise RGB frames into NCHW tensors.

use ndarray::Array4;
use resize::{new, Pixel, Type};
use rgb::FromSlice;
use thiserror::Error;
use vigil_camera::Frame;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("cannot resize {src_w}x{src_h} frame to {dst_w}x{dst_h}: {reason}")]
    Resize {
        src_w: u32,
        src_h: u32,
        dst_w: u32,
        dst_h: u32,
        reason: String,
    },
    #[error("empty frame")]
    EmptyFrame,
}

pub type Result<T> = std::result::Result<T, PreprocessError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Resize to the model input and map every byte `x` to `x * scale + offset`.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    dst_w: u32,
    dst_h: u32,
    scale: f32,
    offset: f32,
    order: ChannelOrder,
}

impl Preprocessor {
    pub fn new(dst_w: u32, dst_h: u32) -> Self {
        Self { dst_w, dst_h, scale: 1.0 / 255.0, offset: 0.0, order: ChannelOrder::Rgb }
    }

    pub fn with_normalisation(mut self, scale: f32, offset: f32) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn with_order(mut self, order: ChannelOrder) -> Self {
        self.order = order;
        self
    }

    /// MobileNet-SSD on the CPU runtime: 300×300, raw 0–255, RGB.
    pub fn ssd() -> Self {
        Self::new(300, 300).with_normalisation(1.0, 0.0)
    }

    /// MobileNet-SSD on the accelerated runtime: 300×300, `2/255·x − 1`.
    pub fn ssd_trt() -> Self {
        Self::new(300, 300).with_normalisation(2.0 / 255.0, -1.0)
    }

    /// Darknet/Ultralytics style: square input, `x / 255`.
    pub fn yolo(size: u32) -> Self {
        Self::new(size, size)
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.dst_w, self.dst_h)
    }

    /// CPU path – resize with a triangle filter, then pack `[1, 3, H, W]`.
    pub fn run(&self, frame: &Frame) -> Result<Array4<f32>> {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        if w == 0 || h == 0 {
            return Err(PreprocessError::EmptyFrame);
        }
        let (dw, dh) = (self.dst_w as usize, self.dst_h as usize);
        let resize_err = |reason: String| PreprocessError::Resize {
            src_w: frame.width(),
            src_h: frame.height(),
            dst_w: self.dst_w,
            dst_h: self.dst_h,
            reason,
        };

        let resized;
        let pixels: &[u8] = if (w, h) == (dw, dh) {
            frame.as_bytes()
        } else {
            let mut dst = vec![0u8; dw * dh * 3];
            let mut resizer = new(w, h, dw, dh, Pixel::RGB8, Type::Triangle)
                .map_err(|e| resize_err(e.to_string()))?;
            resizer
                .resize(frame.as_bytes().as_rgb(), dst.as_rgb_mut())
                .map_err(|e| resize_err(e.to_string()))?;
            resized = dst;
            &resized
        };

        let plane = dw * dh;
        let mut data = vec![0f32; 3 * plane];
        for (idx, px) in pixels.chunks_exact(3).enumerate() {
            let (c0, c2) = match self.order {
                ChannelOrder::Rgb => (px[0], px[2]),
                ChannelOrder::Bgr => (px[2], px[0]),
            };
            data[idx] = c0 as f32 * self.scale + self.offset;
            data[plane + idx] = px[1] as f32 * self.scale + self.offset;
            data[2 * plane + idx] = c2 as f32 * self.scale + self.offset;
        }

        Array4::from_shape_vec((1, 3, dh, dw), data)
            .map_err(|e| resize_err(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> Frame {
        let data = rgb.iter().copied().cycle().take((w * h * 3) as usize).collect();
        Frame::from_rgb(w, h, data).unwrap()
    }

    #[test]
    fn trt_normalisation_maps_to_unit_range() {
        let out = Preprocessor::ssd_trt().run(&solid(300, 300, [0, 255, 0])).unwrap();
        assert_eq!(out[[0, 0, 10, 10]], -1.0);
        assert!((out[[0, 1, 10, 10]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ssd_keeps_rgb_planes() {
        let out = Preprocessor::ssd().run(&solid(300, 300, [10, 20, 30])).unwrap();
        assert_eq!(out[[0, 0, 0, 0]], 10.0);
        assert_eq!(out[[0, 1, 0, 0]], 20.0);
        assert_eq!(out[[0, 2, 0, 0]], 30.0);
    }

    #[test]
    fn bgr_order_swaps_planes() {
        let pre = Preprocessor::ssd().with_order(ChannelOrder::Bgr);
        let out = pre.run(&solid(300, 300, [10, 20, 30])).unwrap();
        assert_eq!(out[[0, 0, 0, 0]], 30.0);
        assert_eq!(out[[0, 2, 0, 0]], 10.0);
    }

    #[test]
    fn empty_frame_is_rejected() {
        let f = Frame::from_rgb(0, 0, vec![]).unwrap();
        assert!(matches!(Preprocessor::yolo(416).run(&f), Err(PreprocessError::EmptyFrame)));
    }
}
