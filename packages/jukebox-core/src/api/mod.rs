//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::events::BroadcastEventBridge;
use crate::protocol_constants::{PORT_SCAN_END, PORT_SCAN_START};
use crate::services::{QueueService, VoteManager};
use crate::state::Config;
use crate::store::BanStore;

pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },

    /// `AppStateBuilder::build` was called without a required component.
    #[error("Missing application component: {0}")]
    MissingComponent(&'static str),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Queue mutations and the cached queue view.
    pub queue_service: Arc<QueueService>,
    /// Owner of the active ban vote.
    pub vote_manager: Arc<VoteManager>,
    /// Banned-track list, read by `/api/bans`.
    pub bans: Arc<dyn BanStore>,
    /// Event bridge feeding WebSocket and SSE clients.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections and presence.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    queue_service: Option<Arc<QueueService>>,
    vote_manager: Option<Arc<VoteManager>>,
    bans: Option<Arc<dyn BanStore>>,
    event_bridge: Option<Arc<BroadcastEventBridge>>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    config: Option<Arc<RwLock<Config>>>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_service(mut self, service: Arc<QueueService>) -> Self {
        self.queue_service = Some(service);
        self
    }

    pub fn vote_manager(mut self, manager: Arc<VoteManager>) -> Self {
        self.vote_manager = Some(manager);
        self
    }

    pub fn bans(mut self, bans: Arc<dyn BanStore>) -> Self {
        self.bans = Some(bans);
        self
    }

    pub fn event_bridge(mut self, bridge: Arc<BroadcastEventBridge>) -> Self {
        self.event_bridge = Some(bridge);
        self
    }

    pub fn ws_manager(mut self, manager: Arc<WsConnectionManager>) -> Self {
        self.ws_manager = Some(manager);
        self
    }

    pub fn config(mut self, config: Arc<RwLock<Config>>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MissingComponent`] naming the first unset field.
    pub fn build(self) -> Result<AppState, ServerError> {
        Ok(AppState {
            queue_service: self
                .queue_service
                .ok_or(ServerError::MissingComponent("queue_service"))?,
            vote_manager: self
                .vote_manager
                .ok_or(ServerError::MissingComponent("vote_manager"))?,
            bans: self.bans.ok_or(ServerError::MissingComponent("bans"))?,
            event_bridge: self
                .event_bridge
                .ok_or(ServerError::MissingComponent("event_bridge"))?,
            ws_manager: self
                .ws_manager
                .ok_or(ServerError::MissingComponent("ws_manager"))?,
            config: self.config.ok_or(ServerError::MissingComponent("config"))?,
        })
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

async fn find_available_port(start: u16, end: u16) -> Result<(u16, TcpListener), ServerError> {
    for port in start..=end {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Binds the configured port, or the first free one in the scan range.
pub async fn bind_listener(preferred_port: u16) -> Result<(u16, TcpListener), ServerError> {
    if preferred_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], preferred_port));
        Ok((preferred_port, TcpListener::bind(&addr).await?))
    } else {
        find_available_port(PORT_SCAN_START, PORT_SCAN_END).await
    }
}

/// CORS for browser clients served from other origins.
fn cors_layer(trusted_origins: Vec<String>) -> CorsLayer {
    let allow_origin = if trusted_origins.is_empty() {
        AllowOrigin::any()
    } else {
        log::info!("CORS trusted origins: {:?}", trusted_origins);
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin = origin.to_str().unwrap_or("");
            trusted_origins
                .iter()
                .any(|allowed| origin.starts_with(allowed.as_str()))
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(false)
}

/// Starts the HTTP server and serves until `shutdown` is cancelled.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> Result<(), ServerError> {
    let preferred_port = state.config.read().preferred_port;
    let (port, listener) = bind_listener(preferred_port).await?;

    let trusted_origins = state.config.read().trusted_origins.clone();
    let app = http::create_router(state)
        .layer(cors_layer(trusted_origins))
        .layer(TraceLayer::new_for_http());

    log::info!("Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
