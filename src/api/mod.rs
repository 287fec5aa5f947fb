use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{Result, ScoutError};
use crate::orchestrator::Orchestrator;
use crate::scheduler::{JobInput, JobStatus, QueueDepth};

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub workers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub workers: usize,
    pub jobs: usize,
    pub queue: QueueDepth,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps crate errors onto HTTP statuses.
pub struct ApiError(ScoutError);

impl From<ScoutError> for ApiError {
    fn from(err: ScoutError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ScoutError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ScoutError::JobNotComplete(..) | ScoutError::JobTerminal(_) => StatusCode::CONFLICT,
            ScoutError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ScoutError::QueueClosed | ScoutError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/jobs", get(list_jobs_handler).post(submit_job_handler))
        .route("/api/jobs/:id", get(job_status_handler))
        .route("/api/jobs/:id/result", get(job_result_handler))
        .route("/api/jobs/:id/cancel", post(cancel_job_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting API server");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    tracing::info!("API server stopped");
    Ok(())
}

async fn health_handler(State(state): State<ApiState>) -> Json<HealthResponse> {
    let orchestrator = &state.orchestrator;
    Json(HealthResponse {
        status: "ok".to_string(),
        workers: state.workers,
        jobs: orchestrator.jobs().len().await,
        queue: orchestrator.queue().depth().await,
    })
}

async fn list_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.orchestrator.list_jobs().await)
}

async fn submit_job_handler(
    State(state): State<ApiState>,
    Json(input): Json<JobInput>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let job_id = state.orchestrator.submit_job(input).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}

async fn job_status_handler(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.get_status(id).await?))
}

async fn job_result_handler(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.get_result(id).await?))
}

async fn cancel_job_handler(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.cancel_job(id).await?))
}
