use crate::deadline::{self, Elapsed};
use facegate_core::{Descriptor, DisplaySize, FaceDetection, FaceInference, InferenceError};
use facegate_hw::frame::FrameError;
use facegate_hw::{CameraError, VideoSource};
use image::DynamicImage;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Timeout(#[from] Elapsed),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Faces found in one live frame, in that frame's pixel space.
pub struct FrameDetections {
    pub faces: Vec<FaceDetection>,
    pub frame_size: DisplaySize,
}

/// Messages sent to the engine thread.
enum EngineRequest {
    DetectAll {
        reply: oneshot::Sender<Result<FrameDetections, EngineError>>,
    },
    LiveDescriptor {
        reply: oneshot::Sender<Result<Option<Descriptor>, EngineError>>,
    },
    Describe {
        image: DynamicImage,
        reply: oneshot::Sender<Result<Option<Descriptor>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every request is bounded by the handle's timeout, queueing included.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        what: &'static str,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = build(reply_tx);
        deadline::within(self.timeout, what, async {
            self.tx
                .send(request)
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        })
        .await?
    }

    /// Capture a frame and detect every face in it.
    pub async fn detect_all(&self) -> Result<FrameDetections, EngineError> {
        self.request("overlay detection", |reply| EngineRequest::DetectAll { reply })
            .await
    }

    /// Capture a frame and extract the descriptor of its most confident face.
    pub async fn live_descriptor(&self) -> Result<Option<Descriptor>, EngineError> {
        self.request("live descriptor", |reply| EngineRequest::LiveDescriptor { reply })
            .await
    }

    /// Extract the descriptor of the most confident face in a reference image.
    pub async fn describe(&self, image: DynamicImage) -> Result<Option<Descriptor>, EngineError> {
        self.request("reference descriptor", |reply| EngineRequest::Describe { image, reply })
            .await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the camera and the model backend and serves requests
/// one at a time, so detection calls never overlap. It exits once every
/// handle is dropped.
pub fn spawn_engine(
    camera: Box<dyn VideoSource>,
    inference: Box<dyn FaceInference>,
    request_timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            let mut camera = camera;
            let mut inference = inference;
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::DetectAll { reply } => {
                        let _ = reply.send(run_detect_all(camera.as_mut(), inference.as_mut()));
                    }
                    EngineRequest::LiveDescriptor { reply } => {
                        let _ = reply.send(run_live_descriptor(camera.as_mut(), inference.as_mut()));
                    }
                    EngineRequest::Describe { image, reply } => {
                        let _ = reply.send(run_describe(inference.as_mut(), &image));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        timeout: request_timeout,
    })
}

fn run_detect_all(
    camera: &mut dyn VideoSource,
    inference: &mut dyn FaceInference,
) -> Result<FrameDetections, EngineError> {
    let frame = camera.capture_frame()?;
    let faces = inference.detect_all(&frame.to_image()?)?;
    tracing::trace!(faces = faces.len(), seq = frame.sequence, "overlay frame analysed");
    Ok(FrameDetections {
        faces,
        frame_size: DisplaySize::new(frame.width, frame.height),
    })
}

fn run_live_descriptor(
    camera: &mut dyn VideoSource,
    inference: &mut dyn FaceInference,
) -> Result<Option<Descriptor>, EngineError> {
    let frame = camera.capture_frame()?;
    let face = inference.detect_single(&frame.to_image()?)?;
    tracing::debug!(found = face.is_some(), seq = frame.sequence, "live face");
    Ok(face.and_then(|f| f.descriptor))
}

fn run_describe(
    inference: &mut dyn FaceInference,
    image: &DynamicImage,
) -> Result<Option<Descriptor>, EngineError> {
    Ok(inference.detect_single(image)?.and_then(|f| f.descriptor))
}
