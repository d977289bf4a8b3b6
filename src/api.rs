//! REST API Server for the financial reasoning orchestrator
//!
//! Exposes querying and ingestion over HTTP.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::ingestion::Ingestor;
use crate::models::{AnswerRecord, DocumentChunk, QueryOptions};
use crate::Result;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub options: QueryOptions,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestRequest {
    pub chunks: Vec<DocumentChunk>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub ingestor: Arc<Ingestor>,
}

fn status_for(error: &OrchestrationError) -> StatusCode {
    if error.is_fatal_for_query() {
        return match error {
            OrchestrationError::ModelUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
    }
    match error {
        OrchestrationError::InvalidInput(_)
        | OrchestrationError::UnknownLane(_)
        | OrchestrationError::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: OrchestrationError) -> (StatusCode, Json<ApiResponse>) {
    let status = status_for(&error);
    warn!(%status, error = %error, "Request failed");
    (status, Json(ApiResponse::error(error.to_string())))
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Query Endpoint
/// =============================

async fn run_query(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received query: {}", req.query);

    // Dropped with the handler when the client disconnects.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match spawn_query(state.orchestrator.clone(), req, cancel).await {
        Ok(Ok(record)) => (StatusCode::OK, Json(ApiResponse::success(record))),
        Ok(Err(e)) => failure(e),
        Err(e) => {
            warn!(error = %e, "Query task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Query task failed".into())),
            )
        }
    }
}

/// Run a query on its own task. It outlives the handler, so a cancelled
/// token stops it at the next round boundary.
fn spawn_query(
    orchestrator: Arc<Orchestrator>,
    req: QueryRequest,
    cancel: CancellationToken,
) -> JoinHandle<Result<AnswerRecord>> {
    tokio::spawn(async move {
        orchestrator
            .run_with(&req.query, &req.options, &cancel)
            .await
    })
}

/// =============================
/// Ingest Endpoint
/// =============================

async fn ingest(
    State(state): State<ApiState>,
    Json(req): Json<IngestRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.chunks.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("No chunks supplied".into())),
        );
    }

    info!(chunks = req.chunks.len(), "Received ingest request");

    match state.ingestor.ingest(req.chunks).await {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::success(report))),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>, ingestor: Arc<Ingestor>) -> Router {
    let state = ApiState {
        orchestrator,
        ingestor,
    };

    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/query", post(run_query))
        .route("/api/ingest", post(ingest))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    ingestor: Arc<Ingestor>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, ingestor);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
