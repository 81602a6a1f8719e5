//! nm-gpclient-service - NetworkManager VPN plugin for GlobalProtect
//!
//! Started by NetworkManager on the system bus. Launches gpclient for each
//! connection, waits for its tunnel interface and reports the resulting
//! IPv4 configuration back to NetworkManager.

use anyhow::Context;
use clap::Parser;
use nm_gpclient_core::config::{self, ServiceConfig};
use nm_gpclient_core::vpn::{IpCommandProbe, PluginEvent, ServiceState, Session};
use nm_gpclient_core::{debug_requested_by_env, init_logging, plugin};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nm-gpclient-service")]
#[command(about = "NetworkManager VPN plugin service for GlobalProtect gpclient")]
struct Cli {
    /// Keep running between connections (accepted for NetworkManager compatibility)
    #[arg(long)]
    persist: bool,

    /// Enable debug logging (also enabled by GPCLIENT_DEBUG=1)
    #[arg(long)]
    debug: bool,

    /// Service configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// D-Bus name to request instead of the configured one
    #[arg(long, value_name = "NAME")]
    bus_name: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.debug || debug_requested_by_env()) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("Starting nm-gpclient-service {}", env!("CARGO_PKG_VERSION"));
    if cli.persist {
        info!("Running in persistent mode");
    }

    let config = config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let bus_name = cli
        .bus_name
        .clone()
        .unwrap_or_else(|| config.dbus.bus_name.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = start_session(&config, events_tx.clone());

    let connection = plugin::serve(&bus_name, session.clone())
        .await
        .with_context(|| format!("Failed to register {} on the system bus", bus_name))?;
    info!("Connected to D-Bus as {}", bus_name);

    let forwarder = tokio::spawn(plugin::forward_events(connection.clone(), events_rx));
    let _ = events_tx.send(PluginEvent::StateChanged(ServiceState::Init));

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
    }

    if let Err(e) = session.shutdown().await {
        warn!("Session shutdown: {}", e);
    }

    // Let the final StateChanged(SHUTDOWN) reach the bus.
    drop(session);
    drop(events_tx);
    match forwarder.await {
        Ok(Err(e)) => warn!("Signal forwarding stopped: {}", e),
        Err(e) => warn!("Signal forwarding task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("nm-gpclient-service stopped");
    Ok(())
}

fn start_session(config: &ServiceConfig, events: mpsc::UnboundedSender<PluginEvent>) -> Session {
    let probe = IpCommandProbe::new(
        config.discovery.sysfs_net.clone(),
        config.discovery.ip_command.clone(),
    );
    Session::start(config, Arc::new(probe), events)
}
