//! # HTTP transport
//!
//! Thin axum layer over [`Engine`]. Every handler delegates to one engine
//! operation and maps [`EngineError`] onto a status code.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderName, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::engine::{Engine, ImportResponse, StartResponse};
use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::session::{SessionDocument, Step};

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub session_id: String,
    pub answer: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub metrics: Metrics,
    pub success_rate: f64,
    pub live_sessions: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidState(_) => StatusCode::CONFLICT,
        EngineError::CorruptState(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: EngineError) -> ApiError {
    let status = status_for(&err);
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: status.as_u16(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    api_error(EngineError::InvalidInput(message.into()))
}

/// Shared state for every handler
pub type AppState = Arc<Engine>;

/// Build the router with all endpoints
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/start-session-with-device-file", post(start_session_handler))
        .route("/submit-answer", post(submit_answer_handler))
        .route("/export-session/:session_id", get(export_session_handler))
        .route("/import-session", post(import_session_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// HTTP server for the assessment engine
pub struct HttpServer {
    config: ServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        let router = router(state, &config);
        Self { config, router }
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Bind and serve until the process exits
    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "assessment engine listening");
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}

/// Read the `file` field of a multipart upload, ignoring any other field.
async fn read_upload(mut multipart: Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        if field.name() == Some("file") {
            let data = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
            return Ok(data.to_vec());
        }
    }
    Err(bad_request("no file provided"))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsResponse> {
    let metrics = state.metrics().await;
    Json(MetricsResponse {
        success_rate: metrics.success_rate(),
        live_sessions: state.live_sessions().await,
        metrics,
    })
}

async fn start_session_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<StartResponse>, ApiError> {
    let data = read_upload(multipart).await?;
    state
        .start_session_from_slice(&data)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn submit_answer_handler(
    State(state): State<AppState>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<Step>, ApiError> {
    state
        .submit_answer(&request.session_id, request.answer)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn export_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<([(HeaderName, String); 1], Json<SessionDocument>), ApiError> {
    let doc = state
        .export_session(&session_id)
        .await
        .map_err(api_error)?;
    let disposition = format!("attachment; filename=session_{}.json", session_id);
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(doc)))
}

async fn import_session_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ImportResponse>, ApiError> {
    let data = read_upload(multipart).await?;
    state
        .import_session_from_slice(&data)
        .await
        .map(Json)
        .map_err(api_error)
}
