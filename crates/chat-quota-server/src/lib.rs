use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chat_quota_tracker::{Tier, TierPlan, UsageError, UsageTracker};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, instrument};

pub mod config;

pub use config::{ConfigError, ServerConfig};

/// Shared state for the API server
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<UsageTracker>,
}

impl AppState {
    pub fn new(tracker: UsageTracker) -> Self {
        Self {
            tracker: Arc::new(tracker),
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
    #[serde(skip)]
    status: StatusCode,
}

impl From<UsageError> for ApiError {
    fn from(err: UsageError) -> Self {
        let (status, code) = match &err {
            UsageError::UserNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            UsageError::InvalidTier(_) => (StatusCode::BAD_REQUEST, "INVALID_TIER"),
            UsageError::Database(e) => {
                error!("database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
            }
        };
        Self {
            error: err.to_string(),
            code: code.to_string(),
            status,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.status(), rejection.body_text())
    }
}

impl ApiError {
    fn invalid_request(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: "INVALID_REQUEST".to_string(),
            status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub tier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTierRequest {
    pub tier: String,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/tiers", get(list_tiers_handler))
        .route("/api/v1/users/:id", post(register_handler))
        .route("/api/v1/users/:id/check", get(check_handler))
        .route("/api/v1/users/:id/messages", post(consume_handler))
        .route("/api/v1/users/:id/tier", put(update_tier_handler))
        .route("/api/v1/users/:id/usage", get(usage_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn list_tiers_handler(State(state): State<AppState>) -> Json<Vec<TierPlan>> {
    Json(state.tracker.catalog().plans().to_vec())
}

fn has_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

// An empty body means "default tier"; anything else must be valid JSON
#[instrument(skip(state, headers, body))]
async fn register_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RegisterRequest::default()
    } else if !has_json_content_type(&headers) {
        return Err(ApiError::invalid_request(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected request with `Content-Type: application/json`",
        ));
    } else {
        let Json(request) = Json::<RegisterRequest>::from_bytes(&body)?;
        request
    };

    let tier = request.tier.map(|t| t.parse::<Tier>()).transpose()?;
    let record = state.tracker.register_user(&user_id, tier).await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

#[instrument(skip(state))]
async fn check_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let check = state.tracker.check_usage(&user_id).await?;
    Ok(Json(check).into_response())
}

#[instrument(skip(state))]
async fn consume_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let check = state.tracker.try_consume(&user_id).await?;
    let status = if check.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    Ok((status, Json(check)).into_response())
}

#[instrument(skip(state, request))]
async fn update_tier_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    request: Result<Json<UpdateTierRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = request?;
    let tier: Tier = request.tier.parse()?;
    let record = state.tracker.update_tier(&user_id, tier).await?;
    Ok(Json(record).into_response())
}

#[instrument(skip(state))]
async fn usage_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let summary = state.tracker.usage_summary(&user_id).await?;
    Ok(Json(summary).into_response())
}
