//! Sonorium Server - standalone headless soundscape server.
//!
//! Scans a themes directory, owns the broadcast channel pool, and serves
//! the HTTP control surface plus the MP3 channel streams. Network speaker
//! protocols are pluggable; without an adapter the server still streams to
//! anything that can fetch an HTTP MP3 URL.

mod config;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sonorium_core::{
    bootstrap_services, start_server, NetworkContext, NullMediaControl, StaticTopology,
    SystemIpDetector,
};

use crate::config::ServerConfig;

/// Sonorium Server - headless ambient soundscape streaming server.
#[derive(Parser, Debug)]
#[command(name = "sonorium-server")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SONORIUM_LOG_LEVEL")]
    pub log_level: log::LevelFilter,

    /// Bind port (overrides the config file).
    #[arg(short = 'p', long, env = "SONORIUM_BIND_PORT")]
    pub port: Option<u16>,

    /// Advertise IP address (overrides the config file).
    #[arg(short = 'a', long, env = "SONORIUM_ADVERTISE_IP")]
    pub advertise_ip: Option<IpAddr>,

    /// Themes directory (overrides the config file).
    #[arg(short = 't', long, env = "SONORIUM_THEMES_DIR")]
    pub themes_dir: Option<PathBuf>,

    /// Persistent state file (overrides the config file).
    #[arg(short = 's', long, env = "SONORIUM_STATE_FILE")]
    pub state_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();
    log::info!("Sonorium Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::resolve(&args)?;
    run(config).await
}

async fn run(config: ServerConfig) -> Result<()> {
    let network = match config.advertise_ip {
        Some(ip) => NetworkContext::fixed(ip, config.bind_port),
        None => NetworkContext::detected(config.bind_port, Arc::new(SystemIpDetector)).context(
            "no reachable local IP found; pass --advertise-ip (or set \
             SONORIUM_ADVERTISE_IP) to an address your speakers can reach",
        )?,
    };
    log::info!(
        "Advertising at {}:{}",
        network.advertised_ip(),
        config.bind_port
    );

    // Device protocol adapters plug in here; the headless default logs
    // speaker commands and relies on speakers pulling the HTTP stream.
    let services = bootstrap_services(
        config.core(),
        network,
        Arc::new(NullMediaControl),
        Arc::new(StaticTopology::new()),
    )
    .context("Failed to bootstrap services")?;
    log::info!(
        "{} theme(s) loaded, {} channel(s) ready",
        services.library.list().len(),
        services.channels.all().len()
    );

    let ticker = services.start_background_tasks();

    // The server and the signal watcher race; whichever finishes first
    // tears the process down.
    let outcome = tokio::select! {
        result = start_server(services.app_state(), config.bind_port) => {
            result.context("HTTP server failed")
        }
        _ = shutdown_requested() => {
            log::info!("Shutdown requested, cleaning up...");
            Ok(())
        }
    };

    ticker.abort();
    services.shutdown();
    log::info!("Shutdown complete");
    outcome
}

/// Resolves when the process is asked to stop: Ctrl+C everywhere, plus
/// SIGTERM on unix (the service-manager case).
async fn shutdown_requested() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
            return;
        }
        log::warn!("SIGTERM handler unavailable, watching Ctrl+C only");
    }

    if tokio::signal::ctrl_c().await.is_err() {
        // No signal delivery at all; park here and let the service manager
        // kill the process outright.
        std::future::pending::<()>().await;
    }
}
