//! Startup sequence and verification.

use crate::config::Config;
use crate::deadline::{self, Elapsed};
use crate::engine::{self, EngineError, EngineHandle};
use crate::references::{self, LoaderOptions, ReferenceError, ReferenceSource, ReferenceStats};
use crate::sources::{DirReferenceSource, HttpReferenceSource};
use crate::status::StatusBoard;
use facegate_core::{
    decide, AppState, EuclideanMatcher, FaceInference, InferenceError, ReferenceIdentity, VerificationOutcome,
};
use facegate_hw::{Camera, CameraError, VideoSource};
use facegate_models::OnnxInference;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Status line for any startup failure other than a camera denial.
pub const STARTUP_FAILED: &str = "Failed to load models or webcam";

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("model load failed: {0}")]
    Models(#[from] InferenceError),
    #[error("camera unavailable: {0}")]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Timeout(#[from] Elapsed),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("startup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A verification was requested while another one is running.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("a verification is already in progress")]
pub struct VerifyBusy;

/// Blocking constructors for the model backend and the camera.
pub trait Platform: Send + Sync + 'static {
    fn load_models(&self, model_dir: &Path) -> Result<Box<dyn FaceInference>, InferenceError>;
    fn open_camera(&self, device: &str) -> Result<Box<dyn VideoSource>, CameraError>;
}

/// ONNX models and a V4L2 camera.
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    fn load_models(&self, model_dir: &Path) -> Result<Box<dyn FaceInference>, InferenceError> {
        Ok(Box::new(OnnxInference::load(model_dir)?))
    }

    fn open_camera(&self, device: &str) -> Result<Box<dyn VideoSource>, CameraError> {
        Ok(Box::new(Camera::open(device)?))
    }
}

/// A running verification session.
pub struct Gate {
    status: StatusBoard,
    engine: EngineHandle,
    source: Arc<dyn ReferenceSource>,
    loader: LoaderOptions,
    references: RwLock<Arc<Vec<ReferenceIdentity>>>,
    verify_lock: Mutex<()>,
}

/// Bring the session up: models, then camera, then first frame, then engine.
///
/// Failures publish a terminal state. A camera denial publishes
/// `CameraDenied` and nothing further is attempted.
pub async fn start(
    platform: Arc<dyn Platform>,
    config: &Config,
    status: StatusBoard,
    source: Arc<dyn ReferenceSource>,
) -> Result<Gate, StartupError> {
    status.set(AppState::Initializing);

    let inference = match load_models(Arc::clone(&platform), config).await {
        Ok(inference) => inference,
        Err(e) => {
            tracing::error!(error = %e, "model load failed");
            status.set(AppState::Failed(STARTUP_FAILED.to_string()));
            return Err(e);
        }
    };

    let camera = match open_camera(Arc::clone(&platform), config).await {
        Ok(camera) => camera,
        Err(e) => {
            if matches!(&e, StartupError::Camera(c) if c.is_denied()) {
                tracing::error!(error = %e, "webcam access denied");
                status.set(AppState::CameraDenied);
            } else {
                tracing::error!(error = %e, "webcam unavailable");
                status.set(AppState::Failed(STARTUP_FAILED.to_string()));
            }
            return Err(e);
        }
    };

    let engine = match engine::spawn_engine(camera, inference, config.inference_timeout()) {
        Ok(engine) => engine,
        Err(e) => {
            status.set(AppState::Failed(STARTUP_FAILED.to_string()));
            return Err(e.into());
        }
    };

    status.set(AppState::Ready);

    Ok(Gate {
        status,
        engine,
        source,
        loader: LoaderOptions {
            concurrency: config.fetch_concurrency,
            fetch_timeout: config.fetch_timeout(),
            decode_timeout: config.decode_timeout(),
        },
        references: RwLock::new(Arc::new(Vec::new())),
        verify_lock: Mutex::new(()),
    })
}

async fn load_models(platform: Arc<dyn Platform>, config: &Config) -> Result<Box<dyn FaceInference>, StartupError> {
    let model_dir: PathBuf = config.model_dir.clone();
    tracing::info!(dir = %model_dir.display(), "loading models");
    let inference = deadline::within(
        config.model_timeout(),
        "model load",
        tokio::task::spawn_blocking(move || platform.load_models(&model_dir)),
    )
    .await???;
    tracing::info!("models loaded");
    Ok(inference)
}

/// Open the camera and wait for its first frame.
async fn open_camera(platform: Arc<dyn Platform>, config: &Config) -> Result<Box<dyn VideoSource>, StartupError> {
    let device = config.camera_device.clone();
    let camera = deadline::within(
        config.camera_timeout(),
        "camera open",
        tokio::task::spawn_blocking(move || -> Result<Box<dyn VideoSource>, CameraError> {
            let mut camera = platform.open_camera(&device)?;
            let frame = camera.capture_frame()?;
            let (width, height) = camera.dimensions();
            tracing::info!(device = %device, width, height, seq = frame.sequence, "first frame ready");
            Ok(camera)
        }),
    )
    .await???;
    Ok(camera)
}

/// Pick the reference source: the backend URL if set, else the configured
/// directory, else the default directory.
pub fn build_reference_source(config: &Config) -> Result<Arc<dyn ReferenceSource>, ReferenceError> {
    if let Some(url) = &config.reference_url {
        return Ok(Arc::new(HttpReferenceSource::new(url)?));
    }
    let dir = config
        .reference_dir
        .clone()
        .unwrap_or_else(Config::default_reference_dir);
    Ok(Arc::new(DirReferenceSource::new(dir)))
}

impl Gate {
    pub fn engine(&self) -> EngineHandle {
        self.engine.clone()
    }

    /// Reload the reference set from the source and swap it in.
    ///
    /// On a failed listing the current set is kept.
    pub async fn reload_references(&self) -> Result<ReferenceStats, ReferenceError> {
        let loaded = references::load_references(
            Arc::clone(&self.source),
            Arc::new(self.engine.clone()),
            self.loader,
        )
        .await?;
        let stats = ReferenceStats::of(&loaded);
        *self.references.write().await = Arc::new(loaded);
        Ok(stats)
    }

    pub async fn reference_stats(&self) -> ReferenceStats {
        ReferenceStats::of(&self.references.read().await)
    }

    /// Verify the live face against the references and publish the result.
    ///
    /// A call made while another verification is running is refused.
    pub async fn verify(&self) -> Result<(AppState, VerificationOutcome), VerifyBusy> {
        let Ok(_guard) = self.verify_lock.try_lock() else {
            tracing::info!("verification already running; request refused");
            return Err(VerifyBusy);
        };
        self.status.set(AppState::Verifying);

        let (state, outcome) = match self.engine.live_descriptor().await {
            Ok(live) => {
                let references = Arc::clone(&*self.references.read().await);
                let verdict = decide(live.as_ref(), &references, &EuclideanMatcher);
                tracing::info!(?verdict, "verification finished");
                (AppState::from(&verdict), VerificationOutcome::from(&verdict))
            }
            Err(e) => {
                tracing::warn!(error = %e, "verification failed");
                let outcome = VerificationOutcome {
                    matched: false,
                    label: None,
                };
                (AppState::VerifyFailed(e.to_string()), outcome)
            }
        };

        self.status.set(state.clone());
        Ok((state, outcome))
    }
}
