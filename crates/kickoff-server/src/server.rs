use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use kickoff_feed::Receiver;
use kickoff_telemetry::PrometheusHandle;
use serde::Serialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::broadcaster::Broadcaster;
use crate::config::ServerConfig;
use crate::connection::{self, ConnectionSettings};
use crate::error::ServerError;
use crate::registry::ConnectionRegistry;

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub connection: ConnectionSettings,
    pub max_message_size: usize,
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        registry: Arc<ConnectionRegistry>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            registry,
            connection: config.connection_settings(),
            max_message_size: config.max_message_size,
            metrics,
            started_at: Instant::now(),
        }
    }
}

/// Build the axum router. Paths that match no route fall through to
/// `static_dir` when one is given.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));
    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };
    router
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the listener and start serving, and start the broadcaster draining
/// `documents` into the same registry.
pub async fn start(
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    documents: Receiver<Bytes>,
    metrics: Option<PrometheusHandle>,
) -> Result<ServerHandle, ServerError> {
    let state = AppState::new(&config, Arc::clone(&registry), metrics);
    let static_dir = config.static_dir.as_deref().filter(|dir| dir.is_dir());
    if let (Some(configured), None) = (config.static_dir.as_deref(), static_dir) {
        warn!(dir = %configured.display(), "static directory not found, serving API routes only");
    }
    let router = build_router(state, static_dir);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::Bind { addr, source })?;

    info!(%local_addr, "kickoff server listening");

    let broadcaster = Broadcaster::new(registry).spawn(documents);

    let server = tokio::spawn(async move {
        if let Err(source) = axum::serve(listener, router).await {
            let err = ServerError::Io {
                addr: local_addr,
                source,
            };
            warn!(error = %err, "server stopped");
        }
    });

    Ok(ServerHandle {
        local_addr,
        server,
        broadcaster,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    server: JoinHandle<()>,
    broadcaster: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting and stop broadcasting. Open sockets are dropped with
    /// the runtime; there is no drain.
    pub fn abort(&self) {
        self.server.abort();
        self.broadcaster.abort();
    }
}

/// WebSocket upgrade handler. A request that cannot be upgraded gets a 400.
async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(error = %rejection, "websocket handshake rejected");
            return (StatusCode::BAD_REQUEST, "websocket upgrade required").into_response();
        }
    };
    ws.max_message_size(state.max_message_size)
        .on_failed_upgrade(|error| warn!(%error, "websocket upgrade failed"))
        .on_upgrade(move |socket| connection::serve(socket, state.registry, state.connection))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    connections: usize,
    uptime_secs: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        connections: state.registry.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
