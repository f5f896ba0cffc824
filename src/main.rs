//! stickcal - analog stick calibration and input timing analysis.
//!
//! The browser talks to the controller over WebHID and streams its input
//! here; this process runs the calibration sessions and answers with state
//! snapshots and device requests over one WebSocket.

mod calibration;
mod config;
mod controller;
mod device;
mod error;
mod finetune;
mod histogram;
mod input;
mod timing;
mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use config::EngineConfig;
use controller::Controller;
use device::remote::{PendingReplies, RemoteDevice};
use web::state::{UiState, WebCommand};

#[derive(Parser)]
#[command(name = "stickcal", about = "Analog stick calibration and input timing analysis")]
struct Args {
    /// Web UI port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// JSON config file overriding engine defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    info!("=== stickcal ===");
    info!("Web UI port: {}", args.port);

    let cfg = EngineConfig::load(args.config.as_deref())?;

    let ui_state = Arc::new(UiState::new());
    // Input frames arrive at the controller's polling rate.
    let (cmd_tx, cmd_rx) = mpsc::channel::<WebCommand>(1024);
    let (events, _) = broadcast::channel::<String>(256);
    let pending = PendingReplies::new();

    // Spawn web server
    let web_state = ui_state.clone();
    let web_events = events.clone();
    let web_pending = pending.clone();
    let web_port = args.port;
    tokio::spawn(async move {
        if let Err(e) = web::start_server(web_port, web_state, cmd_tx, web_events, web_pending).await {
            error!("[WEB] Server error: {e}");
        }
    });

    // --- State emitter task (5Hz broadcast when changed) ---
    let emitter_state = ui_state.clone();
    let emitter_events = events.clone();
    tokio::spawn(async move {
        loop {
            if let Some(snapshot) = emitter_state.pop_if_changed() {
                let msg = serde_json::json!({
                    "type": "state_update",
                    "state": snapshot,
                });
                let _ = emitter_events.send(msg.to_string());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });

    let device = RemoteDevice::new(
        events.clone(),
        pending,
        Duration::from_millis(cfg.device.request_timeout_ms),
    );
    Controller::new(device, cfg, ui_state, events).run(cmd_rx).await;

    info!("Done.");
    Ok(())
}
