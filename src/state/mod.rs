use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use sea_orm::DatabaseConnection;

use crate::config::{CacheConfig, TelegramConfig};
use crate::profile::ResolvedProfile;
use crate::storage::StorageClient;

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub cache: Arc<ApiCache>,
    pub storage: Arc<StorageClient>,
    pub bot_token: Arc<String>,
    pub max_auth_age_seconds: i64,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: DatabaseConnection,
        cache: Arc<ApiCache>,
        storage: Arc<StorageClient>,
        telegram: &TelegramConfig,
    ) -> Self {
        assert!(
            cache.profile_capacity >= 100,
            "Profile cache capacity must be configured"
        );
        assert!(
            telegram.max_auth_age_seconds > 0,
            "Auth age window must be positive"
        );
        Self {
            database,
            cache,
            storage,
            bot_token: Arc::new(telegram.bot_token.clone()),
            max_auth_age_seconds: telegram.max_auth_age_seconds,
            start_time: Instant::now(),
        }
    }

    /// Token for initData verification, or `None` when the deployment
    /// has no token configured yet.
    pub fn bot_token(&self) -> Option<&str> {
        if self.bot_token.is_empty() {
            None
        } else {
            Some(self.bot_token.as_str())
        }
    }
}

pub struct ApiCache {
    pub profiles: Cache<i64, Arc<ResolvedProfile>>,
    pub profile_capacity: u64,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.profiles_max_capacity >= 100,
            "Profile cache capacity threshold"
        );

        let profiles = Cache::builder()
            .max_capacity(config.profiles_max_capacity)
            .time_to_live(Duration::from_secs(config.profiles_ttl_seconds))
            .time_to_idle(Duration::from_secs(config.profiles_ttl_seconds / 2 + 1))
            .build();

        Self {
            profiles,
            profile_capacity: config.profiles_max_capacity,
        }
    }

    /// Drops the cached profile after a write so the next read sees
    /// fresh tariff and curator state.
    pub async fn invalidate_profile(&self, tg_id: i64) {
        self.profiles.invalidate(&tg_id).await;
    }
}
