//! notch-voice: Background daemon driving the notch voice assistant
//!
//! This daemon runs as a LaunchAgent and provides:
//! - The voice session state machine (phases, transcript, tool status)
//! - A real-time room transport and audio level sampling
//! - IPC server for the notch UI and activation URLs

mod config;
mod context;
mod events;
mod ipc;
mod lifecycle;
mod session;
mod transport;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::SessionEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::session::{SessionCommand, SessionInput, VoiceSession};
use crate::transport::{ConnectOptions, TransportDriver};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "notch-voice starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, voice = config.voice.display_name(), "configuration loaded");
    if config.credentials.require().is_err() {
        warn!("room credentials incomplete, connects will fail until configured");
    }

    let mut shutdown = ShutdownSignal::new()?;

    // Host and driver -> session
    let (session_tx, session_rx) = mpsc::channel::<SessionInput>(32);
    // Session -> driver
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    // Room backend -> session
    let (transport_event_tx, transport_event_rx) = mpsc::unbounded_channel();
    // Session -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<SessionEvent>(64);

    let options = ConnectOptions {
        voice: config.voice,
        ..Default::default()
    };
    let mut session = VoiceSession::new(
        config.credentials.clone(),
        options,
        command_tx,
        event_tx.clone(),
    );

    #[cfg(feature = "livekit")]
    let transport = transport::LiveKitTransport::new(transport_event_tx);
    #[cfg(not(feature = "livekit"))]
    let transport = {
        drop(transport_event_tx);
        warn!("built without a room backend, sessions cannot connect");
        transport::UnavailableTransport::new()
    };

    let driver = TransportDriver::new(
        Arc::new(transport),
        session_tx.clone(),
        config.level_interval(),
    );
    let driver_handle = tokio::spawn(driver.run(command_rx));

    // Create IPC server wired to the session
    let server = Server::new(
        &config.socket_path,
        session_tx.clone(),
        session.subscribe_snapshots(),
        event_tx,
    )?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the session (host commands and room events)
        _ = session.run(session_rx, transport_event_rx) => {
            info!("voice session exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;

    // Leave the room before the driver goes away
    session.handle_input(SessionInput::Command(SessionCommand::Disconnect));
    drop(session);
    drop(session_tx);
    if let Err(e) = driver_handle.await {
        warn!(?e, "transport driver task failed");
    }

    info!("notch-voice stopped");

    Ok(())
}
