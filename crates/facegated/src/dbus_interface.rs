use crate::session::Gate;
use crate::status::StatusSnapshot;
use facegate_core::{OverlaySnapshot, VerificationOutcome};
use std::sync::Arc;
use tokio::sync::watch;
use zbus::interface;

/// D-Bus interface for the facegate daemon.
///
/// Bus name: org.facegate.Gate1
/// Object path: /org/facegate/Gate1
pub struct GateService {
    /// `None` when startup failed; status and overlay are still served.
    gate: Option<Arc<Gate>>,
    status: watch::Receiver<StatusSnapshot>,
    overlay: watch::Receiver<OverlaySnapshot>,
}

impl GateService {
    pub fn new(
        gate: Option<Arc<Gate>>,
        status: watch::Receiver<StatusSnapshot>,
        overlay: watch::Receiver<OverlaySnapshot>,
    ) -> Self {
        Self { gate, status, overlay }
    }

    fn gate(&self) -> zbus::fdo::Result<&Arc<Gate>> {
        self.gate
            .as_ref()
            .ok_or_else(|| zbus::fdo::Error::Failed(self.status.borrow().status.clone()))
    }
}

#[interface(name = "org.facegate.Gate1")]
impl GateService {
    /// Verify the live face against the reference set.
    ///
    /// Returns whether it matched and the resulting status line.
    async fn verify(&self) -> zbus::fdo::Result<(bool, String)> {
        tracing::info!("verify requested");
        let gate = self.gate()?;
        let state = self.status.borrow().state.clone();
        if !state.accepts_verify() {
            return Err(zbus::fdo::Error::Failed(format!("cannot verify now: {state}")));
        }
        let (state, VerificationOutcome { matched, .. }) = gate
            .verify()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok((matched, state.to_string()))
    }

    /// Return daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.status.borrow().clone();
        let references = match &self.gate {
            Some(gate) => Some(gate.reference_stats().await),
            None => None,
        };
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": snapshot.state,
            "status": snapshot.status,
            "updated_at": snapshot.updated_at,
            "references": references,
        })
        .to_string())
    }

    /// Return the latest overlay drawing as JSON.
    async fn overlay(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.overlay.borrow().clone();
        serde_json::to_string(&snapshot).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Reload the reference set. Returns (total, usable).
    async fn reload_references(&self) -> zbus::fdo::Result<(u32, u32)> {
        tracing::info!("reload requested");
        let stats = self
            .gate()?
            .reload_references()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok((stats.total as u32, stats.usable as u32))
    }
}
