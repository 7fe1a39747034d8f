//! HTTP server.
//!
//! Exposes the KPI queries and the question-answering pipeline as a JSON
//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/cost_by_owner?month=YYYY-MM` | Cost per owner |
//! | `GET`  | `/kpi?month=YYYY-MM` | Cost per owner, KPI shape |
//! | `GET`  | `/kpi/summary?month=YYYY-MM` | Total, per-service and per-group cost |
//! | `GET`  | `/monthly_trend?owner=<name>` | One owner's cost per month |
//! | `GET`  | `/recommendations?month=&threshold=` | Idle resources and untagged spend |
//! | `POST` | `/ask` | Answer a free-text question |
//! | `POST` | `/index/rebuild` | Rebuild the text index from the store |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "month must be YYYY-MM" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `timeout` (408), `internal` (500).
//!
//! `/ask` never fails once its body is valid JSON with a string `question`
//! (blank questions included): dependency failures degrade inside the
//! pipeline.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! dashboards.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use finops_copilot_core::models::{
    is_invoice_month, IdleResource, MonthlyKpi, OwnerCost, TrendPoint, UntaggedCost,
};

use crate::answer::{ask, AppContext, AskResponse};
use crate::config::Config;
use crate::external::{guarded, Dependency, ExternalError};

/// Default `usage_qty` threshold for idle-resource recommendations.
pub const DEFAULT_IDLE_THRESHOLD: f64 = 1.0;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
}

/// Builds the router with every endpoint and permissive CORS.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/cost_by_owner", get(handle_cost_by_owner))
        .route("/kpi", get(handle_kpi))
        .route("/kpi/summary", get(handle_kpi_summary))
        .route("/monthly_trend", get(handle_monthly_trend))
        .route("/recommendations", get(handle_recommendations))
        .route("/ask", post(handle_ask))
        .route("/index/rebuild", post(handle_index_rebuild))
        .layer(cors)
        .with_state(AppState { ctx })
}

/// Starts the HTTP server.
///
/// Builds the [`AppContext`] (fatal if the database is missing or the
/// completion key is unset), rebuilds the text index in the background when
/// no usable index was persisted, then serves on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let ctx = Arc::new(AppContext::from_config(config.clone()).await?);

    if !ctx.index.is_ready() && config.index.rebuild_on_start && config.embedding.is_enabled() {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tracing::info!("building text index from the store");
            match ctx.rebuild_index().await {
                Ok(documents) => tracing::info!(documents, "text index ready"),
                Err(e) => tracing::warn!(
                    error = %format!("{:#}", e),
                    "index rebuild failed, serving fallback documents"
                ),
            }
        });
    }

    let app = router(ctx);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "server listening");
    println!("FinOps Copilot listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<ExternalError> for AppError {
    fn from(err: ExternalError) -> Self {
        match err {
            ExternalError::Timeout { .. } => timeout_error(err.to_string()),
            ExternalError::Failed { .. } => {
                tracing::error!(error = %err, "request failed");
                internal(err.to_string())
            }
        }
    }
}

/// Runs one store query under the configured store timeout.
async fn store_call<T>(
    state: &AppState,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, AppError> {
    let timeout = Duration::from_secs(state.ctx.config.timeouts.store_secs);
    Ok(guarded(Dependency::Store, timeout, fut).await?)
}

// ============ Parameters ============

#[derive(Debug, Deserialize)]
struct MonthParams {
    month: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerParams {
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecommendationParams {
    month: Option<String>,
    threshold: Option<String>,
}

/// Validates a `YYYY-MM` month parameter.
fn required_month(month: Option<String>) -> Result<String, AppError> {
    let month = month
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| bad_request("month is required (YYYY-MM)"))?;
    check_month(&month)?;
    Ok(month)
}

fn check_month(month: &str) -> Result<(), AppError> {
    if is_invoice_month(month) {
        Ok(())
    } else {
        Err(bad_request(format!("month must be YYYY-MM, got '{}'", month)))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /cost_by_owner, /kpi ============

#[derive(Serialize)]
struct CostByOwnerResponse {
    month: String,
    data: Vec<OwnerCost>,
}

async fn handle_cost_by_owner(
    State(state): State<AppState>,
    Query(params): Query<MonthParams>,
) -> Result<Json<CostByOwnerResponse>, AppError> {
    let month = required_month(params.month)?;
    let data = store_call(&state, state.ctx.store.cost_by_owner(&month)).await?;
    Ok(Json(CostByOwnerResponse { month, data }))
}

#[derive(Serialize)]
struct KpiResponse {
    month: String,
    cost_by_owner: Vec<OwnerCost>,
}

async fn handle_kpi(
    State(state): State<AppState>,
    Query(params): Query<MonthParams>,
) -> Result<Json<KpiResponse>, AppError> {
    let month = required_month(params.month)?;
    let cost_by_owner = store_call(&state, state.ctx.store.cost_by_owner(&month)).await?;
    Ok(Json(KpiResponse {
        month,
        cost_by_owner,
    }))
}

// ============ GET /kpi/summary ============

async fn handle_kpi_summary(
    State(state): State<AppState>,
    Query(params): Query<MonthParams>,
) -> Result<Json<MonthlyKpi>, AppError> {
    let month = required_month(params.month)?;
    let kpi = store_call(&state, state.ctx.store.monthly_kpi(&month)).await?;
    Ok(Json(kpi))
}

// ============ GET /monthly_trend ============

#[derive(Serialize)]
struct TrendResponse {
    owner: String,
    monthly_trend: Vec<TrendPoint>,
}

async fn handle_monthly_trend(
    State(state): State<AppState>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<TrendResponse>, AppError> {
    let owner = params
        .owner
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .ok_or_else(|| bad_request("owner is required"))?;
    let monthly_trend = store_call(&state, state.ctx.store.monthly_trend(&owner)).await?;
    Ok(Json(TrendResponse {
        owner,
        monthly_trend,
    }))
}

// ============ GET /recommendations ============

#[derive(Serialize)]
struct RecommendationsResponse {
    month: Option<String>,
    idle_resources: Vec<IdleResource>,
    missing_tags: Vec<UntaggedCost>,
}

async fn handle_recommendations(
    State(state): State<AppState>,
    Query(params): Query<RecommendationParams>,
) -> Result<Json<RecommendationsResponse>, AppError> {
    let month = params
        .month
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    if let Some(m) = &month {
        check_month(m)?;
    }
    let threshold = match params.threshold.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_IDLE_THRESHOLD,
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite() && *t >= 0.0)
            .ok_or_else(|| {
                bad_request(format!(
                    "threshold must be a non-negative number, got '{}'",
                    raw
                ))
            })?,
    };

    let store = &state.ctx.store;
    let idle_resources = store_call(
        &state,
        store.detect_idle_resources(threshold, month.as_deref()),
    )
    .await?;
    let missing_tags = store_call(&state, store.missing_owner_tags(month.as_deref())).await?;

    Ok(Json(RecommendationsResponse {
        month,
        idle_resources,
        missing_tags,
    }))
}

// ============ POST /ask ============

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    Ok(Json(ask(&state.ctx, &request.question).await))
}

// ============ POST /index/rebuild ============

#[derive(Serialize)]
struct RebuildResponse {
    documents: usize,
}

async fn handle_index_rebuild(
    State(state): State<AppState>,
) -> Result<Json<RebuildResponse>, AppError> {
    if !state.ctx.config.embedding.is_enabled() {
        return Err(AppError {
            status: StatusCode::BAD_REQUEST,
            code: "embeddings_disabled".to_string(),
            message: "embedding provider is disabled".to_string(),
        });
    }
    let timeout = Duration::from_secs(state.ctx.config.timeouts.index_secs);
    let documents = guarded(Dependency::Index, timeout, state.ctx.rebuild_index()).await?;
    Ok(Json(RebuildResponse { documents }))
}
