use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default recording ceiling: two hours.
pub const DEFAULT_MAX_DURATION_SECS: u64 = 7200;
/// Default upload ceiling: 500 MiB.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 500 * 1024 * 1024;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

/// Main configuration for the recording service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Recording limits and URL lifetimes
    #[serde(default)]
    pub recording: RecordingConfig,
    /// Post-processing queue configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Retention cleanup configuration
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding recording media
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL used when resolving an object's public URL (CDN or proxy)
    pub public_base_url: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Recording limits. A zero limit falls back to its default.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// Longest allowed recording, in seconds
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Largest accepted upload, in bytes
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    /// Validity of presigned upload URLs
    #[serde(default = "default_url_ttl_secs")]
    pub upload_url_ttl_secs: u64,
    /// Validity of presigned download URLs
    #[serde(default = "default_url_ttl_secs")]
    pub download_url_ttl_secs: u64,
}

/// Post-processing queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Delay before an uploaded recording is marked processed
    #[serde(default = "default_processing_delay_ms")]
    pub delay_ms: u64,
    /// Attempts before a recording is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Retry delay ceiling
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Jobs buffered before enqueue starts rejecting
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Recordings re-enqueued from the database on worker startup
    #[serde(default = "default_recovery_batch_size")]
    pub recovery_batch_size: i64,
    /// Jobs the worker runs at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

/// Retention cleanup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Expired recordings handled per cleanup run
    #[serde(default = "default_cleanup_batch_size")]
    pub cleanup_batch_size: i64,
    /// Interval at which the service binary triggers cleanup
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "recording-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_max_duration_secs() -> u64 {
    DEFAULT_MAX_DURATION_SECS
}

fn default_max_file_size_bytes() -> u64 {
    DEFAULT_MAX_FILE_SIZE_BYTES
}

fn default_url_ttl_secs() -> u64 {
    3600
}

fn default_processing_delay_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_recovery_batch_size() -> i64 {
    500
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_cleanup_batch_size() -> i64 {
    100
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .set_default("service.name", "recording-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/recording").required(false))
            .add_source(config::File::with_name("/etc/ridecast/recording").required(false))
            // RECORDING__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("RECORDING")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("database.url".to_string()));
        }

        if self.processing.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.processing.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "processing.max_concurrent_jobs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.retention.cleanup_batch_size <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "retention.cleanup_batch_size".to_string(),
                message: "must be positive".to_string(),
            });
        }

        Ok(())
    }

    /// Get the cleanup trigger interval as Duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.retention.cleanup_interval_secs.max(1))
    }
}

impl RecordingConfig {
    pub fn max_duration_secs(&self) -> u64 {
        if self.max_duration_secs == 0 {
            DEFAULT_MAX_DURATION_SECS
        } else {
            self.max_duration_secs
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        if self.max_file_size_bytes == 0 {
            DEFAULT_MAX_FILE_SIZE_BYTES
        } else {
            self.max_file_size_bytes
        }
    }

    pub fn upload_url_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_url_ttl_secs.max(1))
    }

    pub fn download_url_ttl(&self) -> Duration {
        Duration::from_secs(self.download_url_ttl_secs.max(1))
    }
}

impl ProcessingConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            max_file_size_bytes: default_max_file_size_bytes(),
            upload_url_ttl_secs: default_url_ttl_secs(),
            download_url_ttl_secs: default_url_ttl_secs(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_processing_delay_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            queue_capacity: default_queue_capacity(),
            recovery_batch_size: default_recovery_batch_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            cleanup_batch_size: default_cleanup_batch_size(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}
