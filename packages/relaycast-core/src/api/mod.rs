//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to [`Coordinator`]. It
//! provides the router construction and server startup functionality.

use std::sync::Arc;

use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};

use crate::bootstrap::BootstrappedServices;
use crate::coordinator::Coordinator;
use crate::events::BroadcastEventBridge;
use crate::store::PersistentStore;

pub mod http;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("no available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// A thin wrapper holding the one handle every handler needs — the
/// coordinator — plus the store and event bridge for the two read paths
/// (`list_history`/`list_queue` admin reads, and a future push transport)
/// that don't go through the command surface.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    pub store: Arc<PersistentStore>,
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Preferred bind port; `0` means auto-discover within [`PORT_RANGE`].
    pub preferred_port: u16,
}

/// Fallback port range consulted when no preferred port is configured.
const PORT_RANGE: (u16, u16) = (49400, 49410);

impl AppState {
    pub fn from_services(services: BootstrappedServices, preferred_port: u16) -> Self {
        Self {
            coordinator: services.coordinator,
            store: services.store,
            event_bridge: services.event_bridge,
            preferred_port,
        }
    }
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
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let (port, listener) = if state.preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.preferred_port));
        (state.preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(PORT_RANGE.0, PORT_RANGE.1).await?
    };

    log::info!("server listening on http://0.0.0.0:{port}");
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);
    let app = http::create_router(state).layer(cors);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
