//! Tensor preparation and output decoding for the ONNX networks.

use facegate_core::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;

pub(crate) const PIXEL_MEAN: f32 = 127.5;
pub(crate) const PIXEL_STD: f32 = 128.0;

/// Metadata for mapping letterboxed coordinates back to the source image.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn for_size(width: u32, height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (input_size as f32 - new_w) / 2.0,
            pad_y: (input_size as f32 - new_h) / 2.0,
        }
    }

    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Pixel rectangle clamped to image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Clamp a detection box to a `width` x `height` image. `None` if nothing is left.
    pub fn from_bbox(bbox: &BoundingBox, width: u32, height: u32) -> Option<Self> {
        let x0 = bbox.x.max(0.0).floor() as u32;
        let y0 = bbox.y.max(0.0).floor() as u32;
        let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(width);
        let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// Grayscale → normalized NCHW tensor with the channel replicated three times.
fn to_tensor(gray: &GrayImage, size: u32, offset_x: u32, offset_y: u32) -> Array4<f32> {
    let s = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, s, s));

    for y in 0..size {
        for x in 0..size {
            let inside = x >= offset_x
                && y >= offset_y
                && x - offset_x < gray.width()
                && y - offset_y < gray.height();
            let pixel = if inside {
                gray.get_pixel(x - offset_x, y - offset_y).0[0] as f32
            } else {
                PIXEL_MEAN
            };
            let normalized = (pixel - PIXEL_MEAN) / PIXEL_STD;
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = normalized;
            }
        }
    }

    tensor
}

/// Letterbox `gray` into an `input_size` square tensor.
pub(crate) fn letterbox_tensor(gray: &GrayImage, input_size: u32) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::for_size(gray.width(), gray.height(), input_size);
    let new_w = ((gray.width() as f32 * letterbox.scale).round() as u32).clamp(1, input_size);
    let new_h = ((gray.height() as f32 * letterbox.scale).round() as u32).clamp(1, input_size);
    let resized = imageops::resize(gray, new_w, new_h, FilterType::Triangle);

    let tensor = to_tensor(
        &resized,
        input_size,
        letterbox.pad_x.floor() as u32,
        letterbox.pad_y.floor() as u32,
    );
    (tensor, letterbox)
}

/// Crop `rect` from `gray` and stretch it to an `input_size` square tensor.
pub(crate) fn crop_tensor(gray: &GrayImage, rect: CropRect, input_size: u32) -> Array4<f32> {
    let crop = imageops::crop_imm(gray, rect.x, rect.y, rect.width, rect.height).to_image();
    let resized = imageops::resize(&crop, input_size, input_size, FilterType::Triangle);
    to_tensor(&resized, input_size, 0, 0)
}

/// Decode detector rows `[x1, y1, x2, y2, score]`, coordinates normalized to
/// the letterboxed input. Boxes are mapped back to source pixels.
pub(crate) fn decode_detections(
    raw: &[f32],
    input_size: u32,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let size = input_size as f32;
    raw.chunks_exact(5)
        .filter(|row| row[4] > threshold)
        .filter_map(|row| {
            let (x1, y1) = letterbox.unmap(row[0] * size, row[1] * size);
            let (x2, y2) = letterbox.unmap(row[2] * size, row[3] * size);
            if x2 <= x1 || y2 <= y1 {
                return None;
            }
            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: row[4],
            })
        })
        .collect()
}

/// Map landmark pairs normalized to a crop back into image pixels.
pub(crate) fn map_landmarks(raw: &[f32], rect: CropRect) -> Vec<(f32, f32)> {
    raw.chunks_exact(2)
        .map(|p| {
            (
                rect.x as f32 + p[0] * rect.width as f32,
                rect.y as f32 + p[1] * rect.height as f32,
            )
        })
        .collect()
}
