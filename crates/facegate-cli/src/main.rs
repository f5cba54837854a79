use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_hw::Camera;

#[derive(Parser)]
#[command(name = "facegate", about = "facegate live face verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the face in front of the camera against the reference set
    Verify,
    /// Show daemon status
    Status,
    /// Print the current overlay (face boxes and landmarks) as JSON
    Overlay,
    /// Reload reference faces from the configured source
    Reload,
    /// List local video capture devices
    Devices,
}

#[zbus::proxy(
    interface = "org.facegate.Gate1",
    default_service = "org.facegate.Gate1",
    default_path = "/org/facegate/Gate1"
)]
trait Gate {
    fn verify(&self) -> zbus::Result<(bool, String)>;
    fn status(&self) -> zbus::Result<String>;
    fn overlay(&self) -> zbus::Result<String>;
    fn reload_references(&self) -> zbus::Result<(u32, u32)>;
}

async fn connect() -> Result<GateProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("cannot reach the session bus")?;
    GateProxy::new(&conn).await.context("facegated is not running")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Verify => {
            println!("Verifying...");
            let (matched, status) = connect().await?.verify().await?;
            println!("{status}");
            if !matched {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            print_json(&connect().await?.status().await?)?;
        }
        Commands::Overlay => {
            print_json(&connect().await?.overlay().await?)?;
        }
        Commands::Reload => {
            let (total, usable) = connect().await?.reload_references().await?;
            tracing::debug!(total, usable, "reload finished");
            println!("Loaded {total} reference(s), {usable} with a usable face");
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}
