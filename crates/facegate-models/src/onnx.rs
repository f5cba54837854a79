//! ONNX Runtime sessions for detection, landmarks and descriptors.

use crate::tensor::{self, CropRect};
use facegate_core::{BoundingBox, Descriptor, FaceDetection, FaceInference, InferenceError, ModelAsset};
use image::{DynamicImage, GrayImage};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_INPUT_SIZE: u32 = 320;
const DETECTOR_SCORE_THRESHOLD: f32 = 0.5;
const LANDMARK_INPUT_SIZE: u32 = 112;
const LANDMARK_POINTS: usize = 68;
const DESCRIPTOR_INPUT_SIZE: u32 = 150;
const DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<OnnxError> for InferenceError {
    fn from(e: OnnxError) -> Self {
        InferenceError::InferenceFailed(e.to_string())
    }
}

fn build_session(path: &Path) -> Result<Session, OnnxError> {
    Ok(Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(path)?)
}

fn load_session(model_dir: &Path, asset: ModelAsset) -> Result<Session, InferenceError> {
    let path = asset.path_in(model_dir);
    if !path.exists() {
        return Err(InferenceError::ModelNotFound {
            asset,
            path: path.display().to_string(),
        });
    }

    let session = build_session(&path).map_err(|e| InferenceError::ModelLoad {
        asset,
        reason: e.to_string(),
    })?;

    tracing::info!(
        asset = asset.name(),
        path = %path.display(),
        inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded model"
    );

    Ok(session)
}

/// Run a session on one NCHW tensor and copy out its first output.
fn run_first_output(session: &mut Session, input: &ndarray::Array4<f32>, what: &str) -> Result<Vec<f32>, OnnxError> {
    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
    let (_, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| OnnxError::InferenceFailed(format!("{what}: {e}")))?;
    Ok(data.to_vec())
}

/// Face model backend running all three networks on the CPU.
pub struct OnnxInference {
    detector: Session,
    landmarks: Session,
    descriptor: Session,
}

impl OnnxInference {
    /// Load the detector, landmark and descriptor models from `model_dir`.
    ///
    /// Every asset must load; the first failure is returned.
    pub fn load(model_dir: &Path) -> Result<Self, InferenceError> {
        let detector = load_session(model_dir, ModelAsset::Detector)?;
        let landmarks = load_session(model_dir, ModelAsset::Landmarks)?;
        let descriptor = load_session(model_dir, ModelAsset::Descriptor)?;
        Ok(Self {
            detector,
            landmarks,
            descriptor,
        })
    }

    fn detect_boxes(&mut self, gray: &GrayImage) -> Result<Vec<BoundingBox>, OnnxError> {
        let (input, letterbox) = tensor::letterbox_tensor(gray, DETECTOR_INPUT_SIZE);
        let raw = run_first_output(&mut self.detector, &input, "detector")?;
        let mut boxes = tensor::decode_detections(&raw, DETECTOR_INPUT_SIZE, &letterbox, DETECTOR_SCORE_THRESHOLD);
        boxes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(boxes)
    }

    fn locate_landmarks(&mut self, gray: &GrayImage, rect: CropRect) -> Result<Vec<(f32, f32)>, OnnxError> {
        let input = tensor::crop_tensor(gray, rect, LANDMARK_INPUT_SIZE);
        let raw = run_first_output(&mut self.landmarks, &input, "landmarks")?;
        if raw.len() != LANDMARK_POINTS * 2 {
            return Err(OnnxError::InferenceFailed(format!(
                "expected {} landmark values, got {}",
                LANDMARK_POINTS * 2,
                raw.len()
            )));
        }
        Ok(tensor::map_landmarks(&raw, rect))
    }

    fn describe(&mut self, gray: &GrayImage, rect: CropRect) -> Result<Descriptor, OnnxError> {
        let input = tensor::crop_tensor(gray, rect, DESCRIPTOR_INPUT_SIZE);
        let raw = run_first_output(&mut self.descriptor, &input, "descriptor")?;
        if raw.len() != DESCRIPTOR_DIM {
            return Err(OnnxError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }
        Ok(Descriptor::new(raw))
    }

    fn analyze(&mut self, gray: &GrayImage, bbox: BoundingBox) -> Result<Option<FaceDetection>, OnnxError> {
        let Some(rect) = CropRect::from_bbox(&bbox, gray.width(), gray.height()) else {
            tracing::debug!(?bbox, "detection outside image; dropped");
            return Ok(None);
        };
        let landmarks = self.locate_landmarks(gray, rect)?;
        let descriptor = self.describe(gray, rect)?;
        Ok(Some(FaceDetection {
            bbox,
            landmarks,
            descriptor: Some(descriptor),
        }))
    }
}

impl FaceInference for OnnxInference {
    fn detect_all(&mut self, image: &DynamicImage) -> Result<Vec<FaceDetection>, InferenceError> {
        let gray = image.to_luma8();
        let boxes = self.detect_boxes(&gray)?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            if let Some(face) = self.analyze(&gray, bbox)? {
                faces.push(face);
            }
        }
        Ok(faces)
    }

    fn detect_single(&mut self, image: &DynamicImage) -> Result<Option<FaceDetection>, InferenceError> {
        let gray = image.to_luma8();
        let boxes = self.detect_boxes(&gray)?;
        for bbox in boxes {
            if let Some(face) = self.analyze(&gray, bbox)? {
                return Ok(Some(face));
            }
        }
        Ok(None)
    }
}
