use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_STORE_TIMEZONE: &str = "America/Sao_Paulo";
const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SYNC_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_SYNC_CHANNEL_CAPACITY: usize = 1024;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// IANA name of the store's fixed time zone. Every schedule decision is
    /// made in this zone, never in the caller's local clock.
    #[serde(default = "default_store_timezone")]
    #[validate(custom = "validate_timezone")]
    pub store_timezone: String,

    /// Dispatch webhook endpoint; outbound notifications are disabled when
    /// unset.
    #[serde(default)]
    pub dispatch_webhook_url: Option<String>,

    /// Bounded timeout for dispatch webhook calls (seconds)
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    /// Heartbeat interval for realtime subscriptions (seconds); observers are
    /// never stale for longer than this.
    #[serde(default = "default_sync_heartbeat_secs")]
    pub sync_heartbeat_secs: u64,

    /// Capacity of the realtime broadcast channel
    #[serde(default = "default_sync_channel_capacity")]
    pub sync_channel_capacity: usize,

    /// Bearer token identifying an authorized operator. Auth mechanics live
    /// outside this service; this is the opaque capability it hands us.
    /// When unset, operator routes are open (development only).
    #[serde(default)]
    pub operator_token: Option<String>,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_store_timezone() -> String {
    DEFAULT_STORE_TIMEZONE.to_string()
}
fn default_dispatch_timeout_secs() -> u64 {
    DEFAULT_DISPATCH_TIMEOUT_SECS
}
fn default_sync_heartbeat_secs() -> u64 {
    DEFAULT_SYNC_HEARTBEAT_SECS
}
fn default_sync_channel_capacity() -> usize {
    DEFAULT_SYNC_CHANNEL_CAPACITY
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn validate_timezone(value: &str) -> Result<(), ValidationError> {
    value.parse::<Tz>().map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("store_timezone");
        err.message = Some("not a valid IANA time zone name".into());
        err
    })
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Parsed store time zone. `store_timezone` is validated at load time so
    /// this cannot fail after `load_config` succeeded.
    pub fn store_tz(&self) -> Tz {
        self.store_timezone
            .parse()
            .unwrap_or(chrono_tz::America::Sao_Paulo)
    }

    pub fn dispatch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn sync_heartbeat(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_heartbeat_secs)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://comanda.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("comanda_api={},tower_http=debug", level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 8080,
            environment: "production".into(),
            log_level: "info".into(),
            log_json: false,
            auto_migrate: false,
            store_timezone: DEFAULT_STORE_TIMEZONE.into(),
            dispatch_webhook_url: None,
            dispatch_timeout_secs: DEFAULT_DISPATCH_TIMEOUT_SECS,
            sync_heartbeat_secs: DEFAULT_SYNC_HEARTBEAT_SECS,
            sync_channel_capacity: DEFAULT_SYNC_CHANNEL_CAPACITY,
            operator_token: None,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: 10,
            db_min_connections: 1,
            db_connect_timeout_secs: 30,
            db_idle_timeout_secs: 600,
            db_acquire_timeout_secs: 8,
        }
    }

    #[test]
    fn default_timezone_parses() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.store_tz(), chrono_tz::America::Sao_Paulo);
    }

    #[test]
    fn bogus_timezone_is_rejected() {
        let mut cfg = base_config();
        cfg.store_timezone = "Mars/Olympus_Mons".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn permissive_cors_only_in_development_or_explicit() {
        let mut cfg = base_config();
        assert!(!cfg.should_allow_permissive_cors());
        cfg.environment = "development".into();
        assert!(cfg.should_allow_permissive_cors());
        cfg.environment = "production".into();
        cfg.cors_allow_any_origin = true;
        assert!(cfg.should_allow_permissive_cors());
    }
}
