use anyhow::Result;
use facegate_core::DisplaySize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod deadline;
mod engine;
mod overlay;
mod references;
mod session;
mod sources;
mod status;

const BUS_NAME: &str = "org.facegate.Gate1";
const OBJECT_PATH: &str = "/org/facegate/Gate1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = config::Config::load()?;
    tracing::info!(
        camera = %config.camera_device,
        model_dir = %config.model_dir.display(),
        overlay_interval_ms = config.overlay_interval_ms,
        "configuration loaded"
    );

    let status = status::StatusBoard::new();
    let source = session::build_reference_source(&config)?;
    tracing::info!(source = %source.describe(), "reference source selected");

    // A failed startup leaves a terminal state that clients can still query.
    let gate = match session::start(Arc::new(session::SystemPlatform), &config, status.clone(), source).await {
        Ok(gate) => Some(Arc::new(gate)),
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            None
        }
    };

    let display = DisplaySize::new(config.display_width, config.display_height);
    let (surface, overlay_rx) = overlay::SharedOverlay::new(display);
    let overlay_loop = gate
        .as_ref()
        .map(|gate| overlay::spawn_overlay(gate.engine(), surface, config.overlay_interval()));

    if let Some(gate) = gate.clone() {
        tokio::spawn(async move {
            if let Err(e) = gate.reload_references().await {
                tracing::error!(error = %e, "initial reference load failed; reference set is empty");
            }
        });
    }

    let service = dbus_interface::GateService::new(gate.clone(), status.subscribe(), overlay_rx);
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, status = %status.current().status, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    if let Some(overlay_loop) = overlay_loop {
        overlay_loop.stop().await;
    }

    Ok(())
}
