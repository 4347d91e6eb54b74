use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::auth::AuthError;
use crate::chat::ChatError;
use crate::state::AppState;
use crate::storage::MediaError;

mod auth;
mod chat;
mod profile;

pub fn router(state: AppState) -> Router {
    assert!(
        state.start_time.elapsed() < Duration::from_secs(86_400),
        "Application uptime exceeds 24 hours before router creation"
    );

    // The Mini App is served from a Telegram webview origin, so CORS
    // stays permissive.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let api_router = auth::router()
        .merge(profile::router())
        .nest("/chat", chat::router())
        .with_state(state.clone());
    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .nest("/api", api_router)
        .layer(cors)
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let uptime = state.start_time.elapsed().as_secs();
    assert!(
        uptime <= 31_536_000,
        "Uptime exceeds one year without restart"
    );
    let response = HealthResponse {
        ok: true,
        status: "live",
        uptime_seconds: uptime,
    };
    Ok(Json(response))
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state
        .database
        .ping()
        .await
        .map_err(|_| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, "database_unavailable"))?;

    let response = ReadyResponse {
        ok: true,
        status: "ready",
        storage_configured: state.storage.configured(),
        cached_profiles: state.cache.profiles.entry_count(),
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    ok: bool,
    status: &'static str,
    storage_configured: bool,
    cached_profiles: u64,
}

/// Wire-visible failure: an HTTP status plus a stable machine-readable
/// code the Mini App branches on. Codes are part of the public contract
/// and never carry free-form detail.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    code: &'static str,
}

impl HttpError {
    pub fn new(status: StatusCode, code: &'static str) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!code.is_empty(), "Error code cannot be empty");
        Self { status, code }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error: {} {}", self.status.as_u16(), self.code);
        let body = Json(ErrorBody {
            ok: false,
            error: self.code.to_string(),
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

impl From<AuthError> for HttpError {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::MalformedPayload | AuthError::MissingHash => StatusCode::BAD_REQUEST,
            AuthError::BadSignature | AuthError::Expired { .. } => StatusCode::UNAUTHORIZED,
        };
        Self::new(status, err.code())
    }
}

impl From<ChatError> for HttpError {
    fn from(err: ChatError) -> Self {
        let status = match &err {
            ChatError::UserNotFound
            | ChatError::ClientNotFound
            | ChatError::CuratorNotFound => StatusCode::NOT_FOUND,
            ChatError::Forbidden | ChatError::NotAllowed => StatusCode::FORBIDDEN,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        if let ChatError::Storage(db_err) = &err {
            tracing::error!("Chat storage error: {db_err}");
        }
        Self::new(status, err.code())
    }
}

impl From<MediaError> for HttpError {
    fn from(err: MediaError) -> Self {
        let status = match &err {
            MediaError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.code())
    }
}
