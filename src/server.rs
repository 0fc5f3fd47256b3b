//! HTTP server.
//!
//! Exposes the [`Engine`] operations as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and task stats) |
//! | `POST` | `/estimate` | File count for a repository URL |
//! | `POST` | `/projects` | Create a project (sync once, queue indexing) |
//! | `POST` | `/projects/{id}/index` | Index the project's repository now |
//! | `POST` | `/projects/{id}/sync` | Sync new commits now |
//! | `GET`  | `/projects/{id}/commits` | Stored commits (queues a background sync) |
//! | `GET`  | `/branches?repo_url=...` | Branch names from the provider |
//!
//! The acting user is taken from the `x-user-id` header; without it the
//! shared service token is used.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "project not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `model_disabled` (400), `not_found` (404),
//! `rate_limited` (429), `provider_error` (502), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use repo_harness_core::models::{CommitRecord, QuotaQuote};

use crate::commit_sync::SyncOutcome;
use crate::config::Config;
use crate::engine::{Engine, ProjectCreated};
use crate::error::IngestError;
use crate::pipeline::IndexReport;
use crate::tasks::TaskStats;

const ANONYMOUS_USER: &str = "anonymous";

/// Build the router. Split out from [`run_server`] so tests can serve it
/// on an ephemeral port.
pub fn router(engine: Engine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/estimate", post(handle_estimate))
        .route("/projects", post(handle_create_project))
        .route("/projects/{id}/index", post(handle_index))
        .route("/projects/{id}/sync", post(handle_sync))
        .route("/projects/{id}/commits", get(handle_commits))
        .route("/branches", get(handle_branches))
        .layer(cors)
        .with_state(engine)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, engine: Engine) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(engine);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("Repo harness listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn acting_user(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string()
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        let (status, code) = match err.downcast_ref::<IngestError>() {
            Some(IngestError::InvalidRepoUrl(_)) => (StatusCode::BAD_REQUEST, "bad_request"),
            Some(IngestError::ModelDisabled) => (StatusCode::BAD_REQUEST, "model_disabled"),
            Some(IngestError::NotFound(_)) | Some(IngestError::ProjectNotFound(_)) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            Some(IngestError::RateLimited { .. }) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Some(IngestError::Provider { .. }) => (StatusCode::BAD_GATEWAY, "provider_error"),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }
        AppError {
            status,
            code,
            message,
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    tasks: TaskStats,
}

async fn handle_health(State(engine): State<Engine>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tasks: engine.task_stats(),
    })
}

// ============ POST /estimate ============

#[derive(Deserialize)]
struct EstimateRequest {
    repo_url: String,
    #[serde(default)]
    token: Option<String>,
}

async fn handle_estimate(
    State(engine): State<Engine>,
    Json(req): Json<EstimateRequest>,
) -> Result<Json<QuotaQuote>, AppError> {
    let quote = engine
        .estimate_cost(&req.repo_url, req.token.as_deref())
        .await?;
    Ok(Json(quote))
}

// ============ POST /projects ============

#[derive(Deserialize)]
struct CreateProjectRequest {
    name: String,
    repo_url: String,
    #[serde(default)]
    branches: Vec<String>,
}

async fn handle_create_project(
    State(engine): State<Engine>,
    headers: HeaderMap,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectCreated>), AppError> {
    if req.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    let created = engine
        .create_project(&req.name, &req.repo_url, &req.branches, &acting_user(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

// ============ POST /projects/{id}/index ============

#[derive(Deserialize, Default)]
struct IndexRequest {
    #[serde(default)]
    token: Option<String>,
}

async fn handle_index(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    body: Option<Json<IndexRequest>>,
) -> Result<Json<IndexReport>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let project = engine
        .store()
        .get_project(&id)
        .await?
        .ok_or_else(|| anyhow::Error::from(IngestError::ProjectNotFound(id.clone())))?;

    let report = engine
        .index_repository(&project.id, &project.repo_url, req.token.as_deref())
        .await?;
    Ok(Json(report))
}

// ============ POST /projects/{id}/sync ============

async fn handle_sync(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SyncOutcome>, AppError> {
    let outcome = engine.sync_commits(&id, &acting_user(&headers)).await?;
    Ok(Json(outcome))
}

// ============ GET /projects/{id}/commits ============

#[derive(Serialize)]
struct CommitsResponse {
    commits: Vec<CommitRecord>,
}

async fn handle_commits(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CommitsResponse>, AppError> {
    let commits = engine.read_commits(&id, &acting_user(&headers)).await?;
    Ok(Json(CommitsResponse { commits }))
}

// ============ GET /branches ============

#[derive(Deserialize)]
struct BranchesQuery {
    repo_url: String,
}

#[derive(Serialize)]
struct BranchesResponse {
    branches: Vec<String>,
}

async fn handle_branches(
    State(engine): State<Engine>,
    Query(query): Query<BranchesQuery>,
    headers: HeaderMap,
) -> Result<Json<BranchesResponse>, AppError> {
    let branches = engine
        .list_branches(&query.repo_url, &acting_user(&headers))
        .await?;
    Ok(Json(BranchesResponse { branches }))
}
