#![deny(clippy::all)]

mod backend;
mod capture;
mod channel;
mod config;
mod error;
mod session;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use backend::HttpBackend;
use capture::{DirectoryCamera, ReadinessGate};
use channel::WsSummaryTransport;
use config::Config;
use session::{ChannelState, NarrationController, NarrationEvent, SessionSettings};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

/// Time given to the fire-and-forget session stop request before exit
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Log controller events; fall back to the latest-summary endpoint when the
/// summary channel goes away
fn spawn_event_logger(
    mut events: broadcast::Receiver<NarrationEvent>,
    controller: Weak<NarrationController>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(NarrationEvent::Narration { text }) => {
                    println!("{}", text);
                }
                Ok(NarrationEvent::StatusChanged(status)) => {
                    info!(status = %status, "Session status");
                    if status.is_terminal() {
                        break;
                    }
                }
                Ok(NarrationEvent::Channel(state)) => {
                    info!("Summary channel: {:?}", state);
                    if matches!(state, ChannelState::Closed | ChannelState::Failed) {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        if let Err(e) = controller.refresh_narration().await {
                            warn!("Failed to fetch latest summary: {}", e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event logger lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();

    let config = Config::load().context("Failed to load configuration")?;

    let backend =
        Arc::new(HttpBackend::new(&config.backend).context("Failed to create backend client")?);
    let transport = Arc::new(WsSummaryTransport::new(
        Duration::from_secs(config.channel.connect_timeout_secs),
        Duration::from_secs(config.channel.ping_interval_secs),
    ));
    let frames_dir = config
        .capture
        .resolved_frames_dir()
        .context("No frames directory available; set NAVI_FRAMES_DIR")?;
    info!("Reading camera stills from {:?}", frames_dir);
    let camera = Arc::new(DirectoryCamera::new(
        frames_dir,
        Duration::from_millis(config.capture.device_init_ms),
    ));

    let controller = Arc::new(NarrationController::new(
        backend,
        transport,
        camera,
        ReadinessGate::new(),
        SessionSettings::from(&config),
    ));
    spawn_event_logger(controller.subscribe(), Arc::downgrade(&controller));
    controller.mount();

    tokio::select! {
        result = controller.start() => {
            if let Err(e) = result {
                error!(
                    "Diagnostics: {:?}, readiness: {:?}",
                    controller.diagnostics(),
                    controller.gate().readiness()
                );
                controller.stop();
                return Err(e).context("Narration session failed to start");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted during start-up");
            controller.stop();
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            return Ok(());
        }
    }

    info!("Narrating, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    controller.stop();
    let snapshot = controller.snapshot();
    info!(
        status = %controller.status(),
        narration = ?controller.narration(),
        "Final diagnostics: {:?}",
        snapshot.diagnostics
    );
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}
