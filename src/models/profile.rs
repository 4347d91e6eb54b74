use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;

use crate::access::{self, Access};
use crate::profile::ResolvedProfile;

/// Telegram-facing user echo, mirrors the WebApp `user` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CuratorView {
    pub id: i64,
    pub name: String,
    pub username: Option<String>,
}

/// Dashboard projection of a resolved profile plus its derived gates.
/// Field names mix snake and camel case to stay bug-compatible with
/// the public wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileView {
    pub id: Option<i64>,
    pub first_name: String,
    #[serde(rename = "tariffName")]
    pub tariff_name: String,
    #[serde(rename = "tariffExpiresAt")]
    pub tariff_expires_at: Option<DateTimeWithTimeZone>,
    #[serde(rename = "trainingMode")]
    pub training_mode: String,
    #[serde(rename = "heightCm")]
    pub height_cm: Option<i32>,
    #[serde(rename = "weightKg")]
    pub weight_kg: Option<f64>,
    pub age: Option<i32>,
    pub role: String,
    #[serde(rename = "canTrain")]
    pub can_train: bool,
    #[serde(rename = "canCurate")]
    pub can_curate: bool,
    #[serde(rename = "isCurator")]
    pub is_curator: bool,
    #[serde(rename = "chatAllowed")]
    pub chat_allowed: bool,
    #[serde(rename = "nutritionLocked")]
    pub nutrition_locked: bool,
    pub trainer: Option<CuratorView>,
}

impl ProfileView {
    pub fn build(profile: &ResolvedProfile, access: &Access) -> Self {
        let is_admin =
            profile.role == access::ROLE_ADMIN || profile.role == access::ROLE_SADMIN;
        let is_curator = profile.role == access::ROLE_CURATOR || profile.is_curator;
        let tariff_active = access::is_tariff_active(
            profile.tariff_expires_at.as_ref(),
            chrono::Utc::now(),
        );

        Self {
            id: profile.id,
            first_name: profile
                .first_name
                .clone()
                .unwrap_or_else(|| "друг".to_string()),
            tariff_name: access.display_tariff.clone(),
            tariff_expires_at: if access.show_expiry && tariff_active {
                profile.tariff_expires_at
            } else {
                None
            },
            training_mode: profile.training_mode.clone(),
            height_cm: profile.height_cm,
            weight_kg: profile.weight_kg,
            age: profile.age,
            role: profile.role.clone(),
            can_train: is_admin,
            can_curate: is_admin || is_curator,
            is_curator,
            chat_allowed: access.chat_allowed,
            nutrition_locked: access.nutrition_locked,
            trainer: profile.curator.as_ref().map(|c| CuratorView {
                id: c.id,
                name: c.name.clone(),
                username: c.username.clone(),
            }),
        }
    }
}

impl UserView {
    pub fn from_profile(profile: &ResolvedProfile) -> Self {
        Self {
            id: profile.tg_id,
            username: profile.username.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            photo_url: profile.photo_url.clone(),
        }
    }
}
