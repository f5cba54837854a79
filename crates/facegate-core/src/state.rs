//! Session state surfaced to clients.

use crate::types::Verdict;
use serde::Serialize;
use std::fmt;

/// Phase of a verification session. `Display` renders the status line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum AppState {
    Initializing,
    /// Models loaded and the camera delivered its first frame.
    Ready,
    Verifying,
    Matched(String),
    /// A face was found but no reference was close enough.
    Denied,
    NoFaceDetected,
    NoValidReferences,
    /// Recoverable failure during a verification attempt.
    VerifyFailed(String),
    /// The camera refused access. Terminal.
    CameraDenied,
    /// Startup failed. Terminal.
    Failed(String),
}

impl AppState {
    /// Terminal states accept no further verification requests.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppState::CameraDenied | AppState::Failed(_))
    }

    /// True once startup has completed and a verification may run.
    pub fn accepts_verify(&self) -> bool {
        !self.is_terminal() && !matches!(self, AppState::Initializing | AppState::Verifying)
    }
}

impl From<&Verdict> for AppState {
    fn from(verdict: &Verdict) -> Self {
        match verdict {
            Verdict::NoFaceDetected => AppState::NoFaceDetected,
            Verdict::NoValidReferences => AppState::NoValidReferences,
            Verdict::Matched { label, .. } => AppState::Matched(label.clone()),
            Verdict::NotMatched { .. } => AppState::Denied,
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppState::Initializing => f.write_str("Initializing..."),
            AppState::Ready => f.write_str("Webcam started"),
            AppState::Verifying => f.write_str("Verifying..."),
            AppState::Matched(label) => write!(f, "Face Matched: {label}"),
            AppState::Denied => f.write_str("Face Not Matched: Access Denied"),
            AppState::NoFaceDetected => f.write_str("No face detected in webcam"),
            AppState::NoValidReferences => f.write_str("No valid reference faces found"),
            AppState::VerifyFailed(reason) => write!(f, "Verification failed: {reason}"),
            AppState::CameraDenied => f.write_str("Webcam access denied"),
            AppState::Failed(reason) => f.write_str(reason),
        }
    }
}
