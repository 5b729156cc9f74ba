//! HTTP API layer.
//!
//! Thin handlers that delegate to the services. This module provides the
//! shared state, router construction, and server startup.

pub mod http;
mod stream;

use std::sync::Arc;

use thiserror::Error;

use crate::channel::manager::ChannelManager;
use crate::context::NetworkContext;
use crate::player::LocalStreamPlayer;
use crate::session::manager::SessionManager;
use crate::state::Config;
use crate::theme::library::ThemeLibrary;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// A thin wrapper holding references to services; all business logic lives
/// in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Loaded themes and their metadata.
    pub library: Arc<ThemeLibrary>,
    /// Session CRUD and playback orchestration.
    pub sessions: Arc<SessionManager>,
    /// The fixed broadcast channel pool.
    pub channels: Arc<ChannelManager>,
    /// Local sound-card playback.
    pub player: Arc<LocalStreamPlayer>,
    /// Network configuration (port, advertise IP).
    pub network: NetworkContext,
    /// Process configuration.
    pub config: Arc<Config>,
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState, bind_port: u16) -> Result<(), ServerError> {
    let (port, listener) = if bind_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], bind_port));
        (bind_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(8008, 8018).await?
    };

    // Announce the bound port; stream URLs handed to speakers depend on it.
    state.network.announce_port(port);
    log::info!(
        "Server listening on http://{}:{}",
        state.network.advertised_ip(),
        port
    );

    let app = http::create_router(state);

    // ConnectInfo<SocketAddr> extraction needs into_make_service_with_connect_info
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
