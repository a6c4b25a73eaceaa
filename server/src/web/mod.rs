//! Web server module
//!
//! Owns the HTTP + WebSocket surface on the bound port and the lifecycle
//! around it: sidecar records written on start and removed on shutdown, the
//! status refresher, and the file-change broadcaster.

pub mod ws;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use driftwatch_core::{PortRecord, ServerEvent, SERVER_VERSION};

use crate::config::ServerConfig;
use crate::dispatch::ToolDispatcher;
use crate::ports;
use crate::state::ServerContext;
use crate::watcher::FileWatcher;

/// State shared by every route handler.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ServerContext>,
    pub dispatcher: Arc<ToolDispatcher>,
}

/// A bound, running server instance.
pub struct RunningServer {
    pub port: u16,
    pub ctx: Arc<ServerContext>,
    server_task: tokio::task::JoinHandle<()>,
    status_task: tokio::task::JoinHandle<()>,
    _watcher: Option<FileWatcher>,
}

impl RunningServer {
    /// Bind the first free port in the configured range, write the sidecar
    /// records, and start serving.
    pub async fn start(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let (listener, port) =
            ports::bind_first_available(config.preferred_port, config.port_range_end).await?;
        tracing::info!(
            "Server bound to port {} (preferred: {})",
            port,
            config.preferred_port
        );

        let watch = config.watch;
        let ctx = Arc::new(ServerContext::new(config, port));
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::clone(&ctx)));

        let watcher = if watch {
            match crate::watcher::start(Arc::clone(&ctx)) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!("File watcher unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        ports::write_port_record(&ctx).await?;
        if let Err(e) = ports::write_status_record(&ctx).await {
            tracing::warn!("Failed to write initial status record: {}", e);
        }
        let status_task = ports::spawn_status_refresher(Arc::clone(&ctx));

        let app = create_router(AppState {
            ctx: Arc::clone(&ctx),
            dispatcher,
        });

        let server_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Server error: {}", e);
            }
        });

        tracing::info!("HTTP listening on {}", ctx.http_url());
        tracing::info!("WebSocket listening on {}", ctx.ws_url());

        Ok(Self {
            port,
            ctx,
            server_task,
            status_task,
            _watcher: watcher,
        })
    }

    /// Notify clients, stop serving, and remove the sidecar records.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down server on port {}", self.port);

        self.ctx.clients.broadcast(&ServerEvent::ServerShutdown {
            message: "Server is shutting down".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });
        // Give the broadcast a moment to flush before the tasks die
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        self.status_task.abort();
        self.server_task.abort();
        ports::cleanup_records(&self.ctx.config.project_path).await;
    }
}

/// Run the server until interrupted, then clean up.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let server = RunningServer::start(config).await?;
    shutdown_signal().await;
    server.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install interrupt handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install terminate handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Build the router with all routes.
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/port-info", get(api_port_info))
        .route("/api/analyze", post(api_analyze))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    port: u16,
    uptime: f64,
    timestamp: String,
}

/// Liveness probe used by client port discovery.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        port: state.ctx.port,
        uptime: state.ctx.uptime(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    port: u16,
    project_path: String,
    clients: usize,
    pid: u32,
    uptime: f64,
    timestamp: String,
}

/// Identity check: discovery accepts a healthy port only after this
/// endpoint confirms a running instance of this service.
async fn api_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running".to_string(),
        port: state.ctx.port,
        project_path: state.ctx.config.project_path.display().to_string(),
        clients: state.ctx.clients.count(),
        pid: state.ctx.pid,
        uptime: state.ctx.uptime(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn api_port_info(State(state): State<AppState>) -> Json<PortRecord> {
    Json(PortRecord {
        port: state.ctx.port,
        ws_url: state.ctx.ws_url(),
        http_url: state.ctx.http_url(),
        pid: state.ctx.pid,
        start_time: Utc::now(),
        project_path: state.ctx.config.project_path.display().to_string(),
        server_version: Some(SERVER_VERSION.to_string()),
    })
}

/// Run the deviation analyzer over the posted arguments.
async fn api_analyze(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let result = state.dispatcher.invoke("analyze_deviation", body).await;

    if result.is_error() {
        let message = result
            .first_text()
            .and_then(|t| serde_json::from_str::<serde_json::Value>(t).ok())
            .and_then(|v| v["message"].as_str().map(String::from))
            .unwrap_or_else(|| "analysis failed".to_string());
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: message }),
        ));
    }

    match serde_json::to_value(&result) {
        Ok(value) => Ok(Json(value)),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}
