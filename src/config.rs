use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_QUEUE_BACKEND: &str = "in-memory";
const DEFAULT_QUEUE_NAMESPACE: &str = "paygate:jobs";
const DEFAULT_RETRY_SCHEDULE: &str = "production";

/// Job queue tuning. The backend decides durability: "in-memory" for tests
/// and single-process runs, "redis" for anything that must survive a restart.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "default_queue_backend")]
    #[validate(custom = "validate_queue_backend")]
    pub backend: String,

    /// Key prefix for queue state when using the Redis backend
    #[serde(default = "default_queue_namespace")]
    pub namespace: String,

    /// How long a claimed job stays invisible before it is redelivered
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,

    /// Worker poll interval when a lane is empty
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Queue-level delivery attempts per job before it is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between queue-level redeliveries
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Concurrent workers per lane
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            namespace: default_queue_namespace(),
            claim_timeout_secs: default_claim_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            worker_concurrency: default_worker_concurrency(),
        }
    }
}

/// Simulated acquirer behavior for the payment worker.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfig {
    /// "probabilistic", "approve", or "decline"
    #[serde(default = "default_processor_mode")]
    #[validate(custom = "validate_processor_mode")]
    pub mode: String,

    #[serde(default = "default_upi_success_rate")]
    #[validate(custom = "validate_rate")]
    pub upi_success_rate: f64,

    #[serde(default = "default_other_success_rate")]
    #[validate(custom = "validate_rate")]
    pub other_success_rate: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            mode: default_processor_mode(),
            upi_success_rate: default_upi_success_rate(),
            other_success_rate: default_other_success_rate(),
        }
    }
}

/// Webhook delivery tuning.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Backoff schedule name: "production" or "sandbox"
    #[serde(default = "default_retry_schedule")]
    #[validate(custom = "validate_retry_schedule")]
    pub retry_schedule: String,

    /// Per-request timeout for merchant endpoints
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            retry_schedule: default_retry_schedule(),
            timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (queue backend, health checks)
    pub redis_url: String,

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

    #[serde(default)]
    #[validate]
    pub queue: QueueConfig,

    #[serde(default)]
    #[validate]
    pub processor: ProcessorConfig,

    #[serde(default)]
    #[validate]
    pub webhooks: WebhookConfig,
}

impl AppConfig {
    /// Builds a configuration programmatically with defaults for everything
    /// beyond the connection endpoints. `load_config` is the production path.
    pub fn new(
        database_url: String,
        redis_url: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            redis_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            queue: QueueConfig::default(),
            processor: ProcessorConfig::default(),
            webhooks: WebhookConfig::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
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

fn default_queue_backend() -> String {
    DEFAULT_QUEUE_BACKEND.to_string()
}
fn default_queue_namespace() -> String {
    DEFAULT_QUEUE_NAMESPACE.to_string()
}
fn default_claim_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_worker_concurrency() -> usize {
    2
}

fn default_processor_mode() -> String {
    "probabilistic".to_string()
}
fn default_upi_success_rate() -> f64 {
    0.90
}
fn default_other_success_rate() -> f64 {
    0.95
}

fn default_retry_schedule() -> String {
    DEFAULT_RETRY_SCHEDULE.to_string()
}
fn default_webhook_timeout_secs() -> u64 {
    5
}

fn validate_queue_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" => Ok(()),
        _ => {
            let mut err = ValidationError::new("queue_backend");
            err.message = Some("Must be one of: in-memory, redis".into());
            Err(err)
        }
    }
}

fn validate_processor_mode(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "probabilistic" | "approve" | "decline" => Ok(()),
        _ => {
            let mut err = ValidationError::new("processor_mode");
            err.message = Some("Must be one of: probabilistic, approve, decline".into());
            Err(err)
        }
    }
}

fn validate_retry_schedule(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "production" | "sandbox" => Ok(()),
        _ => {
            let mut err = ValidationError::new("retry_schedule");
            err.message = Some("Must be one of: production, sandbox".into());
            Err(err)
        }
    }
}

// validator's derive passes Copy fields by value
fn validate_rate(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        let mut err = ValidationError::new("success_rate");
        err.message = Some("Success rates must be between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("paygate_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://paygate.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
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
