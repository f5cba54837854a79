//! Overlay geometry: rescaling detections to the display surface and the
//! drawing seam.

use crate::types::{BoundingBox, FaceDetection};
use serde::{Deserialize, Serialize};

/// Pixel dimensions of a frame or display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Rescale detections from `from` pixel space into `to` pixel space.
///
/// A zero-sized source leaves geometry untouched.
pub fn resize_detections(detections: &[FaceDetection], from: DisplaySize, to: DisplaySize) -> Vec<FaceDetection> {
    if from.width == 0 || from.height == 0 {
        return detections.to_vec();
    }
    let sx = to.width as f32 / from.width as f32;
    let sy = to.height as f32 / from.height as f32;

    detections
        .iter()
        .map(|d| FaceDetection {
            bbox: d.bbox.scaled(sx, sy),
            landmarks: d.landmarks.iter().map(|&(x, y)| (x * sx, y * sy)).collect(),
            descriptor: d.descriptor.clone(),
        })
        .collect()
}

/// A surface that face boxes and landmarks are drawn onto.
pub trait OverlaySurface: Send {
    fn size(&self) -> DisplaySize;
    fn clear(&mut self);
    fn draw_detections(&mut self, detections: &[FaceDetection]);
    fn draw_landmarks(&mut self, detections: &[FaceDetection]);
    /// Make the current drawing visible.
    fn present(&mut self) {}
}

/// Retained-mode overlay: the shapes currently drawn, serializable for clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlaySnapshot {
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<BoundingBox>,
    pub landmarks: Vec<Vec<(f32, f32)>>,
    /// Number of redraws since the surface was created.
    pub frame: u64,
}

impl OverlaySnapshot {
    pub fn new(size: DisplaySize) -> Self {
        Self {
            width: size.width,
            height: size.height,
            ..Default::default()
        }
    }
}

impl OverlaySurface for OverlaySnapshot {
    fn size(&self) -> DisplaySize {
        DisplaySize::new(self.width, self.height)
    }

    fn clear(&mut self) {
        self.boxes.clear();
        self.landmarks.clear();
        self.frame += 1;
    }

    fn draw_detections(&mut self, detections: &[FaceDetection]) {
        self.boxes.extend(detections.iter().map(|d| d.bbox.clone()));
    }

    fn draw_landmarks(&mut self, detections: &[FaceDetection]) {
        self.landmarks.extend(
            detections
                .iter()
                .filter(|d| !d.landmarks.is_empty())
                .map(|d| d.landmarks.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection() -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox {
                x: 100.0,
                y: 50.0,
                width: 200.0,
                height: 100.0,
                confidence: 0.8,
            },
            landmarks: vec![(150.0, 75.0), (250.0, 75.0)],
            descriptor: None,
        }
    }

    #[test]
    fn test_resize_halves_geometry() {
        let resized = resize_detections(
            &[detection()],
            DisplaySize::new(1280, 720),
            DisplaySize::new(640, 360),
        );
        let d = &resized[0];
        assert_eq!((d.bbox.x, d.bbox.y), (50.0, 25.0));
        assert_eq!((d.bbox.width, d.bbox.height), (100.0, 50.0));
        assert_eq!(d.landmarks, vec![(75.0, 37.5), (125.0, 37.5)]);
    }

    #[test]
    fn test_resize_non_uniform() {
        let resized = resize_detections(
            &[detection()],
            DisplaySize::new(400, 200),
            DisplaySize::new(800, 100),
        );
        let d = &resized[0];
        assert_eq!((d.bbox.x, d.bbox.y), (200.0, 25.0));
        assert_eq!(d.bbox.confidence, 0.8);
    }

    #[test]
    fn test_resize_zero_source_is_identity() {
        let resized = resize_detections(&[detection()], DisplaySize::new(0, 0), DisplaySize::new(640, 480));
        assert_eq!(resized, vec![detection()]);
    }

    #[test]
    fn test_snapshot_clear_then_draw() {
        let mut surface = OverlaySnapshot::new(DisplaySize::new(640, 480));
        surface.draw_detections(&[detection(), detection()]);
        surface.clear();
        assert!(surface.boxes.is_empty());

        surface.draw_detections(&[detection()]);
        surface.draw_landmarks(&[detection()]);
        assert_eq!(surface.boxes.len(), 1);
        assert_eq!(surface.landmarks.len(), 1);
        assert_eq!(surface.frame, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let surface = OverlaySnapshot::new(DisplaySize::new(640, 480));
        let json = serde_json::to_value(&surface).unwrap();
        assert_eq!(json["width"], 640);
        assert_eq!(json["boxes"].as_array().unwrap().len(), 0);
    }
}
