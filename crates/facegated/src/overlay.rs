//! Periodic overlay detection as a cancellable task.

use crate::engine::{EngineError, EngineHandle, FrameDetections};
use async_trait::async_trait;
use facegate_core::overlay::resize_detections;
use facegate_core::{DisplaySize, FaceDetection, OverlaySnapshot, OverlaySurface};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Where overlay detections come from.
#[async_trait]
pub trait OverlaySource: Send + Sync + 'static {
    async fn detect(&self) -> Result<FrameDetections, EngineError>;
}

#[async_trait]
impl OverlaySource for EngineHandle {
    async fn detect(&self) -> Result<FrameDetections, EngineError> {
        self.detect_all().await
    }
}

/// Overlay surface that publishes each presented frame to watchers.
pub struct SharedOverlay {
    canvas: OverlaySnapshot,
    tx: watch::Sender<OverlaySnapshot>,
}

impl SharedOverlay {
    pub fn new(size: DisplaySize) -> (Self, watch::Receiver<OverlaySnapshot>) {
        let canvas = OverlaySnapshot::new(size);
        let (tx, rx) = watch::channel(canvas.clone());
        (Self { canvas, tx }, rx)
    }
}

impl OverlaySurface for SharedOverlay {
    fn size(&self) -> DisplaySize {
        self.canvas.size()
    }

    fn clear(&mut self) {
        self.canvas.clear();
    }

    fn draw_detections(&mut self, detections: &[FaceDetection]) {
        self.canvas.draw_detections(detections);
    }

    fn draw_landmarks(&mut self, detections: &[FaceDetection]) {
        self.canvas.draw_landmarks(detections);
    }

    fn present(&mut self) {
        self.tx.send_replace(self.canvas.clone());
    }
}

/// Handle to a running overlay loop. Dropping it also stops the loop.
pub struct OverlayHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl OverlayHandle {
    /// Stop the loop and wait for it to finish. An in-flight detection is abandoned.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "overlay task ended abnormally");
        }
    }
}

/// Start redrawing `surface` every `period`.
///
/// At most one detection is in flight; ticks that fall due while it runs
/// are skipped rather than queued.
pub fn spawn_overlay<S, O>(source: S, mut surface: O, period: Duration) -> OverlayHandle
where
    S: OverlaySource,
    O: OverlaySurface + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(period_ms = period.as_millis() as u64, "overlay loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = &mut shutdown_rx => break,
                result = source.detect() => result,
            };

            match result {
                Ok(FrameDetections { faces, frame_size }) => {
                    let resized = resize_detections(&faces, frame_size, surface.size());
                    surface.clear();
                    surface.draw_detections(&resized);
                    surface.draw_landmarks(&resized);
                    surface.present();
                    tracing::debug!(faces = resized.len(), "overlay redrawn");
                }
                Err(e) => tracing::warn!(error = %e, "overlay detection failed"),
            }
        }

        tracing::info!("overlay loop stopped");
    });

    OverlayHandle {
        shutdown: Some(shutdown_tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::face;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Detection source that takes `latency` per call and tracks overlap.
    #[derive(Clone)]
    struct SlowSource {
        latency: Duration,
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        frame_size: DisplaySize,
    }

    impl SlowSource {
        fn new(latency: Duration, frame_size: DisplaySize) -> Self {
            Self {
                latency,
                calls: Arc::new(AtomicUsize::new(0)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                frame_size,
            }
        }
    }

    #[async_trait]
    impl OverlaySource for SlowSource {
        async fn detect(&self) -> Result<FrameDetections, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(FrameDetections {
                faces: vec![face(vec![0.0])],
                frame_size: self.frame_size,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_redraws_rescaled_geometry() {
        let source = SlowSource::new(Duration::from_millis(10), DisplaySize::new(64, 48));
        let (surface, mut rx) = SharedOverlay::new(DisplaySize::new(128, 96));
        let handle = spawn_overlay(source, surface, Duration::from_millis(300));

        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.boxes.len(), 1);
        // face() puts the box at (10, 10) 20x20 in a 64x48 frame
        assert_eq!(snapshot.boxes[0].x, 20.0);
        assert_eq!(snapshot.boxes[0].width, 40.0);
        assert_eq!(snapshot.landmarks, vec![vec![(30.0, 30.0)]]);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_detection_skips_ticks() {
        let source = SlowSource::new(Duration::from_millis(700), DisplaySize::new(64, 48));
        let (surface, _rx) = SharedOverlay::new(DisplaySize::new(64, 48));
        let handle = spawn_overlay(source.clone(), surface, Duration::from_millis(300));

        tokio::time::sleep(Duration::from_millis(3000)).await;
        handle.stop().await;

        let calls = source.calls.load(Ordering::SeqCst);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        // 10 ticks fall due in 3s; a 700ms detection lets only every third run
        assert!((3..=5).contains(&calls), "calls = {calls}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_deterministic() {
        let source = SlowSource::new(Duration::from_millis(10), DisplaySize::new(64, 48));
        let (surface, _rx) = SharedOverlay::new(DisplaySize::new(64, 48));
        let handle = spawn_overlay(source.clone(), surface, Duration::from_millis(300));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        handle.stop().await;
        let after_stop = source.calls.load(Ordering::SeqCst);
        assert!(after_stop >= 3);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_loop() {
        let source = SlowSource::new(Duration::from_millis(10), DisplaySize::new(64, 48));
        let (surface, _rx) = SharedOverlay::new(DisplaySize::new(64, 48));
        let handle = spawn_overlay(source.clone(), surface, Duration::from_millis(300));
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let calls = source.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }
}
