//! HTTP routes for Courier server.
//!
//! `GET /ws` authenticates and upgrades a connection, then hands the socket
//! to a session. `GET /health` reports liveness and hub counts.

use crate::auth::{self, AuthError, StaticTokenVerifier, TokenVerifier};
use crate::config::Config;
use crate::metrics;
use crate::session::{self, SessionConfig};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use courier_core::{Hub, HubConfig};
use courier_transport::websocket;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The connection hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
    /// Upgrade token verifier.
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    /// Create app state with the static token verifier from configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let verifier = StaticTokenVerifier::new(config.auth.token_map());
        if verifier.is_empty() {
            warn!("No access tokens configured, every upgrade will be rejected");
        }
        Self::with_verifier(config, Arc::new(verifier))
    }

    /// Create app state with a custom verifier.
    #[must_use]
    pub fn with_verifier(config: Config, verifier: Arc<dyn TokenVerifier>) -> Self {
        let hub_config = HubConfig {
            outbound_capacity: config.limits.outbound_queue_capacity,
        };

        Self {
            hub: Arc::new(Hub::with_config(hub_config)),
            config,
            verifier,
        }
    }
}

/// Reasons an upgrade is refused.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("Connection limit reached")]
    AtCapacity,
}

impl IntoResponse for UpgradeError {
    fn into_response(self) -> Response {
        let status = match &self {
            UpgradeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            UpgradeError::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until ctrl-c or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let reporter = tokio::spawn(metrics::report_hub_stats(
        Arc::clone(&state.hub),
        config.metrics.stats_interval(),
    ));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Courier server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let result = serve(listener, state, shutdown_signal()).await;
    reporter.abort();
    result
}

/// Serve on `listener` until `shutdown` completes, then close every
/// connection.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let hub = Arc::clone(&state.hub);
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down");
            // Upgraded sockets outlive the HTTP server; closing their queues ends them
            let closed = hub.unregister_all();
            info!(connections = closed, "Closed all connections");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "onlineUsers": stats.online_users,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, UpgradeError> {
    let user_id = match auth::authenticate(state.verifier.as_ref(), &headers, &query).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(error = %e, "Upgrade rejected");
            metrics::record_rejection("unauthorized");
            return Err(e.into());
        }
    };

    if state.hub.connection_count() >= state.config.limits.max_connections {
        warn!(user = %user_id, "Upgrade rejected, connection limit reached");
        metrics::record_rejection("capacity");
        return Err(UpgradeError::AtCapacity);
    }

    let hub = Arc::clone(&state.hub);
    let max_message_size = state.config.limits.max_message_size;
    let session_config = SessionConfig::from_config(&state.config);

    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let (sender, receiver) = websocket::split(socket, max_message_size);
            session::run_session(hub, user_id, sender, receiver, session_config).await;
        }))
}
