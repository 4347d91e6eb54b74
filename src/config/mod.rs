use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::auth::DEFAULT_MAX_AUTH_AGE;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    pub chat: ChatConfig,
    pub cache: CacheConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("FITDEW_API_CONFIG").unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("FITDEW_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        assert!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        // An empty bot token is tolerated at boot; verification requests
        // answer 500 no_bot_token until one is configured.
        self.telegram.ensure_bounds()?;
        self.storage.ensure_bounds()?;
        self.chat.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        assert!(self.port < 65535, "HTTP port must be below 65535");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "TelegramConfig::default_max_auth_age")]
    pub max_auth_age_seconds: i64,
}

impl TelegramConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.max_auth_age_seconds > 0,
            "Auth age window must be positive"
        );
        assert!(
            self.max_auth_age_seconds <= 30 * 86_400,
            "Auth age window exceeds defensive limit"
        );
        Ok(())
    }

    const fn default_max_auth_age() -> i64 {
        DEFAULT_MAX_AUTH_AGE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "StorageConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "StorageConfig::default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "StorageConfig::default_signed_url_ttl")]
    pub signed_url_ttl_seconds: u64,
    #[serde(default = "StorageConfig::default_max_upload_mb")]
    pub max_upload_mb: i64,
}

impl StorageConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.signed_url_ttl_seconds >= 60,
            "Signed URL TTL must be at least one minute"
        );
        assert!(
            self.signed_url_ttl_seconds <= 7 * 86_400,
            "Signed URL TTL exceeds SigV4 maximum"
        );
        assert!(self.max_upload_mb > 0, "Upload budget must be positive");
        assert!(
            self.max_upload_mb <= 1024,
            "Upload budget exceeds defensive limit"
        );
        Ok(())
    }

    pub fn max_upload_bytes(&self) -> i64 {
        self.max_upload_mb * 1024 * 1024
    }

    fn default_endpoint() -> String {
        "https://s3.twcstorage.ru".to_string()
    }

    fn default_region() -> String {
        "ru-1".to_string()
    }

    const fn default_signed_url_ttl() -> u64 {
        900
    }

    const fn default_max_upload_mb() -> i64 {
        50
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Messages older than this are swept, attachments first. Zero
    /// disables the sweep entirely.
    #[serde(default = "ChatConfig::default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "ChatConfig::default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    #[serde(default = "ChatConfig::default_cleanup_batch_size")]
    pub cleanup_batch_size: u64,
}

impl ChatConfig {
    pub fn cleanup_interval(&self) -> Duration {
        assert!(
            self.cleanup_interval_seconds >= 60,
            "Cleanup interval must be at least one minute"
        );
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    fn ensure_bounds(&self) -> Result<()> {
        assert!(self.retention_days >= 0, "Retention cannot be negative");
        assert!(
            self.retention_days <= 365,
            "Retention exceeds defensive limit"
        );
        assert!(
            self.cleanup_batch_size >= 20,
            "Cleanup batch size must be at least 20"
        );
        assert!(
            self.cleanup_batch_size <= 1000,
            "Cleanup batch size exceeds defensive limit"
        );
        Ok(())
    }

    const fn default_retention_days() -> i64 {
        20
    }

    const fn default_cleanup_interval() -> u64 {
        6 * 3600
    }

    const fn default_cleanup_batch_size() -> u64 {
        200
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub profiles_max_capacity: u64,
    pub profiles_ttl_seconds: u64,
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.profiles_max_capacity >= 100,
            "Profile cache capacity must be at least 100"
        );
        assert!(
            self.profiles_ttl_seconds >= 1,
            "Profile cache TTL must be positive"
        );
        assert!(
            self.profiles_ttl_seconds <= 3600,
            "Profile cache TTL cannot exceed one hour"
        );
        Ok(())
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
