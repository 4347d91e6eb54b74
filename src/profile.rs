use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::prelude::*;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::warn;

use crate::auth::Principal;
use crate::entities::user_profile;

pub const DEFAULT_TARIFF: &str = "Базовый";
pub const DEFAULT_TRAINING_MODE: &str = "gym";
pub const ROLE_USER: &str = "user";

/// A profile as the rest of the system consumes it. `id` is absent only
/// when storage degraded and the default could not be persisted.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub id: Option<i64>,
    pub tg_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub photo_url: Option<String>,
    pub tariff_name: Option<String>,
    pub tariff_expires_at: Option<DateTimeWithTimeZone>,
    pub training_mode: String,
    pub height_cm: Option<i32>,
    pub weight_kg: Option<f64>,
    pub age: Option<i32>,
    pub role: String,
    pub is_curator: bool,
    pub curator: Option<CuratorRef>,
}

#[derive(Debug, Clone)]
pub struct CuratorRef {
    pub id: i64,
    pub name: String,
    pub username: Option<String>,
}

/// Maps a verified principal to its stored profile. A storage miss is the
/// expected first-visit state and synthesizes a default row; a storage
/// error is logged and degrades to the same default so the dashboard
/// never blocks on a transient store fault.
pub async fn resolve(
    db: &DatabaseConnection,
    principal: &Principal,
    tg_id: i64,
) -> ResolvedProfile {
    assert!(tg_id != 0, "Principal id must be non-zero");

    let found = user_profile::Entity::find()
        .filter(user_profile::Column::TgId.eq(tg_id))
        .one(db)
        .await;

    let model = match found {
        Ok(Some(model)) => Some(model),
        Ok(None) => ensure_profile_row(db, principal, tg_id).await,
        Err(err) => {
            warn!("profile lookup for {tg_id} degraded to default: {err}");
            None
        }
    };

    let Some(model) = model else {
        return synthesized_default(principal, tg_id);
    };

    let curator = match model.curator_id {
        Some(curator_id) => load_curator(db, curator_id).await,
        None => None,
    };

    let mut profile = ResolvedProfile::from_model(model, curator);
    if profile.first_name.is_none() {
        profile.first_name = principal_first_name(principal);
    }
    profile
}

async fn ensure_profile_row(
    db: &DatabaseConnection,
    principal: &Principal,
    tg_id: i64,
) -> Option<user_profile::Model> {
    let user = principal.user.as_ref();
    let row = user_profile::ActiveModel {
        id: NotSet,
        tg_id: Set(tg_id),
        username: Set(user.and_then(|u| u.username.clone())),
        first_name: Set(user.and_then(|u| u.first_name.clone())),
        last_name: Set(user.and_then(|u| u.last_name.clone())),
        photo_url: Set(user.and_then(|u| u.photo_url.clone())),
        tariff_name: Set(None),
        tariff_expires_at: Set(None),
        training_mode: Set(DEFAULT_TRAINING_MODE.to_string()),
        height_cm: Set(None),
        weight_kg: Set(None),
        age: Set(None),
        role: Set(ROLE_USER.to_string()),
        is_curator: Set(false),
        curator_id: Set(None),
        created_at: NotSet,
    };
    match user_profile::Entity::insert(row)
        .exec_with_returning(db)
        .await
    {
        Ok(model) => Some(model),
        Err(err) => {
            warn!("profile insert for {tg_id} degraded to default: {err}");
            None
        }
    }
}

async fn load_curator(db: &DatabaseConnection, curator_id: i64) -> Option<CuratorRef> {
    let model = match user_profile::Entity::find_by_id(curator_id).one(db).await {
        Ok(model) => model,
        Err(err) => {
            warn!("curator lookup for {curator_id} failed: {err}");
            None
        }
    }?;
    Some(CuratorRef {
        id: model.id,
        name: display_name(
            model.first_name.as_deref(),
            model.last_name.as_deref(),
            model.username.as_deref(),
            model.id,
        ),
        username: model.username,
    })
}

fn synthesized_default(principal: &Principal, tg_id: i64) -> ResolvedProfile {
    let user = principal.user.as_ref();
    ResolvedProfile {
        id: None,
        tg_id,
        username: user.and_then(|u| u.username.clone()),
        first_name: principal_first_name(principal),
        last_name: user.and_then(|u| u.last_name.clone()),
        photo_url: user.and_then(|u| u.photo_url.clone()),
        tariff_name: None,
        tariff_expires_at: None,
        training_mode: DEFAULT_TRAINING_MODE.to_string(),
        height_cm: None,
        weight_kg: None,
        age: None,
        role: ROLE_USER.to_string(),
        is_curator: false,
        curator: None,
    }
}

fn principal_first_name(principal: &Principal) -> Option<String> {
    principal.user.as_ref().and_then(|u| u.first_name.clone())
}

/// "First Last", falling back to the username, falling back to a numeric
/// placeholder. Mirrors what the Mini App shows in the chat header.
pub fn display_name(
    first_name: Option<&str>,
    last_name: Option<&str>,
    username: Option<&str>,
    id: i64,
) -> String {
    let full: Vec<&str> = [first_name, last_name].into_iter().flatten().collect();
    if !full.is_empty() {
        return full.join(" ");
    }
    if let Some(username) = username {
        if !username.is_empty() {
            return username.to_string();
        }
    }
    format!("Пользователь #{id}")
}

impl ResolvedProfile {
    pub fn from_model(model: user_profile::Model, curator: Option<CuratorRef>) -> Self {
        Self {
            id: Some(model.id),
            tg_id: model.tg_id,
            username: model.username,
            first_name: model.first_name,
            last_name: model.last_name,
            photo_url: model.photo_url,
            tariff_name: model.tariff_name,
            tariff_expires_at: model.tariff_expires_at,
            training_mode: model.training_mode,
            height_cm: model.height_cm,
            weight_kg: model.weight_kg,
            age: model.age,
            role: model.role,
            is_curator: model.is_curator,
            curator,
        }
    }

    pub fn display_name(&self) -> String {
        display_name(
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            self.username.as_deref(),
            self.id.unwrap_or(self.tg_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_full_name() {
        assert_eq!(
            display_name(Some("Ann"), Some("Lee"), Some("ann"), 7),
            "Ann Lee"
        );
        assert_eq!(display_name(Some("Ann"), None, None, 7), "Ann");
        assert_eq!(display_name(None, None, Some("ann"), 7), "ann");
        assert_eq!(display_name(None, None, None, 7), "Пользователь #7");
    }
}
