use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, in the pixel space of the image it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Scale position and size by independent horizontal and vertical factors.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("empty descriptor")]
    Empty,
}

/// Face descriptor: a fixed-length vector summarizing identity features
/// (128-dimensional for the bundled recognition model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean (L2) distance to another descriptor of the same length.
    ///
    /// Descriptors of different lengths come from different models and are
    /// never comparable.
    pub fn euclidean_distance(&self, other: &Descriptor) -> Result<f32, DescriptorError> {
        if self.is_empty() || other.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if self.len() != other.len() {
            return Err(DescriptorError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

/// One face found by the inference backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    /// Facial landmark points (68-point layout for the bundled landmark model).
    pub landmarks: Vec<(f32, f32)>,
    pub descriptor: Option<Descriptor>,
}

/// A named reference face. `descriptor` is `None` when no face was found in
/// the reference image; such entries never take part in matching.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceIdentity {
    pub label: String,
    pub descriptor: Option<Descriptor>,
}

impl ReferenceIdentity {
    pub fn new(label: impl Into<String>, descriptor: Option<Descriptor>) -> Self {
        Self {
            label: label.into(),
            descriptor,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.descriptor.is_some()
    }
}

/// Distance from the live descriptor to one usable reference.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub label: String,
    pub distance: f32,
}

/// Full result of a verification attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The live frame yielded no descriptor; no reference was examined.
    NoFaceDetected,
    /// No reference produced a comparable descriptor.
    NoValidReferences,
    Matched { label: String, distance: f32 },
    NotMatched { distance: f32 },
}

/// Boolean view of a [`Verdict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub matched: bool,
    pub label: Option<String>,
}

impl From<&Verdict> for VerificationOutcome {
    fn from(verdict: &Verdict) -> Self {
        match verdict {
            Verdict::Matched { label, .. } => Self {
                matched: true,
                label: Some(label.clone()),
            },
            _ => Self {
                matched: false,
                label: None,
            },
        }
    }
}
