use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::access;
use crate::auth::{Principal, TelegramUser};
use crate::models::profile::{ProfileView, UserView};
use crate::profile::{self, ResolvedProfile};
use crate::state::AppState;

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/validate", get(validate))
        .route("/user", get(current_user))
}

/// Runs the initData check for a request-supplied payload. All
/// authenticated endpoints funnel through here.
pub(super) fn verify_init_data(
    state: &AppState,
    init_data: Option<&str>,
) -> Result<Principal, HttpError> {
    let raw = init_data
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, "no_init_data"))?;
    let token = state
        .bot_token()
        .ok_or_else(|| HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "no_bot_token"))?;
    Ok(crate::auth::verify(raw, token, state.max_auth_age_seconds)?)
}

pub(super) fn require_tg_id(principal: &Principal) -> Result<i64, HttpError> {
    principal
        .tg_id()
        .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, "no_tg_id"))
}

/// Resolves the requester's profile through the cache. Degraded
/// defaults (no stored row) are never cached, so a recovered store is
/// picked up on the next poll.
pub(super) async fn resolve_cached(
    state: &AppState,
    principal: &Principal,
    tg_id: i64,
) -> Arc<ResolvedProfile> {
    if let Some(cached) = state.cache.profiles.get(&tg_id).await {
        return cached;
    }
    let resolved = Arc::new(profile::resolve(&state.database, principal, tg_id).await);
    if resolved.id.is_some() {
        state
            .cache
            .profiles
            .insert(tg_id, Arc::clone(&resolved))
            .await;
    }
    resolved
}

#[derive(Debug, Deserialize)]
pub(super) struct InitDataQuery {
    #[serde(rename = "initData")]
    pub init_data: Option<String>,
}

async fn validate(
    Query(params): Query<InitDataQuery>,
    State(state): State<AppState>,
) -> Result<Json<ValidateResponse>, HttpError> {
    let principal = verify_init_data(&state, params.init_data.as_deref())?;
    Ok(Json(ValidateResponse {
        ok: true,
        user: principal.user,
    }))
}

async fn current_user(
    Query(params): Query<InitDataQuery>,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, HttpError> {
    let principal = verify_init_data(&state, params.init_data.as_deref())?;
    let tg_id = require_tg_id(&principal)?;

    let resolved = resolve_cached(&state, &principal, tg_id).await;
    let gates = access::derive_access(&resolved);

    Ok(Json(UserResponse {
        ok: true,
        user: UserView::from_profile(&resolved),
        profile: ProfileView::build(&resolved, &gates),
    }))
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    ok: bool,
    user: Option<TelegramUser>,
}

#[derive(Debug, Serialize)]
struct UserResponse {
    ok: bool,
    user: UserView,
    profile: ProfileView,
}
