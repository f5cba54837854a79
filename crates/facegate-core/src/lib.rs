//! Face verification domain logic.
//!
//! Holds the descriptor math and the nearest-reference decision with its
//! fixed rejection threshold. Also defines the inference seam that model
//! backends implement, the overlay geometry and the session state machine.

pub mod inference;
pub mod matcher;
pub mod overlay;
pub mod state;
pub mod types;

pub use inference::{FaceInference, InferenceError, ModelAsset};
pub use matcher::{decide, EuclideanMatcher, Matcher, DISTANCE_THRESHOLD};
pub use overlay::{DisplaySize, OverlaySnapshot, OverlaySurface};
pub use state::AppState;
pub use types::{
    BoundingBox, Descriptor, DescriptorError, FaceDetection, MatchResult, ReferenceIdentity,
    VerificationOutcome, Verdict,
};

/// Default model directory: `$FACEGATE_MODEL_DIR`, or `/usr/share/facegate/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("FACEGATE_MODEL_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("/usr/share/facegate/models"))
}
