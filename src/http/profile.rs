use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use sea_orm::ActiveValue::Set;
use sea_orm::prelude::*;
use sea_orm::{ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter};
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

use crate::entities::user_profile;
use crate::state::AppState;

use super::HttpError;
use super::auth::{require_tg_id, verify_init_data};

pub fn router() -> Router<AppState> {
    Router::new().route("/profile", post(update_profile))
}

/// Anthropometrics update. Only fields present in the body are touched
/// and an explicit `null` clears the stored value; a missing row is
/// created from the principal's display fields first.
async fn update_profile(
    State(state): State<AppState>,
    Json(payload): Json<ProfileUpdateRequest>,
) -> Result<Json<ProfileUpdateResponse>, HttpError> {
    let principal = verify_init_data(&state, payload.init_data.as_deref())?;
    let tg_id = require_tg_id(&principal)?;

    let existing = user_profile::Entity::find()
        .filter(user_profile::Column::TgId.eq(tg_id))
        .one(&state.database)
        .await
        .map_err(storage_error)?;

    let saved = match existing {
        Some(model) => {
            let mut row = model.into_active_model();
            if let Some(height) = payload.height_cm {
                row.height_cm = Set(height);
            }
            if let Some(weight) = payload.weight_kg {
                row.weight_kg = Set(weight);
            }
            if let Some(age) = payload.age {
                row.age = Set(age);
            }
            row.update(&state.database).await.map_err(storage_error)?
        }
        None => {
            let user = principal.user.as_ref();
            let row = user_profile::ActiveModel {
                tg_id: Set(tg_id),
                username: Set(user.and_then(|u| u.username.clone())),
                first_name: Set(user.and_then(|u| u.first_name.clone())),
                last_name: Set(user.and_then(|u| u.last_name.clone())),
                photo_url: Set(user.and_then(|u| u.photo_url.clone())),
                height_cm: Set(payload.height_cm.flatten()),
                weight_kg: Set(payload.weight_kg.flatten()),
                age: Set(payload.age.flatten()),
                ..Default::default()
            };
            user_profile::Entity::insert(row)
                .exec_with_returning(&state.database)
                .await
                .map_err(storage_error)?
        }
    };

    // The dashboard re-reads the profile right after saving.
    state.cache.invalidate_profile(tg_id).await;

    Ok(Json(ProfileUpdateResponse {
        ok: true,
        profile: AnthropometricsView {
            height_cm: saved.height_cm,
            weight_kg: saved.weight_kg,
            age: saved.age,
        },
    }))
}

fn storage_error(err: DbErr) -> HttpError {
    tracing::error!("Profile storage error: {err}");
    HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "server_error")
}

/// `Some(None)` when the field was present but null, `None` when the
/// field was absent from the body.
fn present_or_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
struct ProfileUpdateRequest {
    #[serde(rename = "initData")]
    init_data: Option<String>,
    #[serde(rename = "heightCm", default, deserialize_with = "present_or_null")]
    height_cm: Option<Option<i32>>,
    #[serde(rename = "weightKg", default, deserialize_with = "present_or_null")]
    weight_kg: Option<Option<f64>>,
    #[serde(default, deserialize_with = "present_or_null")]
    age: Option<Option<i32>>,
}

#[derive(Debug, Serialize)]
struct ProfileUpdateResponse {
    ok: bool,
    profile: AnthropometricsView,
}

#[derive(Debug, Serialize)]
struct AnthropometricsView {
    #[serde(rename = "heightCm")]
    height_cm: Option<i32>,
    #[serde(rename = "weightKg")]
    weight_kg: Option<f64>,
    age: Option<i32>,
}
