//! Single writer of the session state; readers subscribe through a watch channel.

use chrono::{DateTime, Utc};
use facegate_core::AppState;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: AppState,
    /// Human-readable status line for `state`.
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    fn new(state: AppState) -> Self {
        Self {
            status: state.to_string(),
            state,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct StatusBoard {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusSnapshot::new(AppState::Initializing));
        Self { tx }
    }

    /// Publish a new state. Terminal states are sticky.
    ///
    /// Returns whether the state was published.
    pub fn set(&self, state: AppState) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state.is_terminal() {
                tracing::debug!(current = %snapshot.state, ignored = %state, "state is terminal; update dropped");
                return false;
            }
            tracing::info!(status = %state, "state changed");
            *snapshot = StatusSnapshot::new(state);
            true
        })
    }

    pub fn current(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
