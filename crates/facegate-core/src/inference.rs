//! Inference seam: face detection, landmarks and descriptors are provided by
//! a model backend behind [`FaceInference`].

use crate::types::FaceDetection;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The three model assets a backend loads before its first detection call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelAsset {
    Detector,
    Landmarks,
    Descriptor,
}

impl ModelAsset {
    pub const ALL: [ModelAsset; 3] = [ModelAsset::Detector, ModelAsset::Landmarks, ModelAsset::Descriptor];

    pub fn name(&self) -> &'static str {
        match self {
            ModelAsset::Detector => "detector",
            ModelAsset::Landmarks => "landmarks",
            ModelAsset::Descriptor => "descriptor",
        }
    }

    /// File name inside the model directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            ModelAsset::Detector => "face_detector.onnx",
            ModelAsset::Landmarks => "face_landmark_68.onnx",
            ModelAsset::Descriptor => "face_recognition.onnx",
        }
    }

    pub fn path_in(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(self.file_name())
    }
}

impl std::fmt::Display for ModelAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("{asset} model not found: {path}")]
    ModelNotFound { asset: ModelAsset, path: String },
    #[error("failed to load {asset} model: {reason}")]
    ModelLoad { asset: ModelAsset, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// A face model backend.
///
/// Calls are blocking and take `&mut self`; the daemon serializes them on a
/// single engine thread.
pub trait FaceInference: Send {
    /// Detect every face in `image`, with landmarks and descriptors.
    fn detect_all(&mut self, image: &DynamicImage) -> Result<Vec<FaceDetection>, InferenceError>;

    /// Detect the single most confident face in `image`.
    fn detect_single(&mut self, image: &DynamicImage) -> Result<Option<FaceDetection>, InferenceError> {
        let faces = self.detect_all(image)?;
        Ok(faces.into_iter().max_by(|a, b| {
            a.bbox
                .confidence
                .partial_cmp(&b.bbox.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        }))
    }
}
