//! Configuration management for DocHarbor services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! Required identifiers (knowledge-base id, data-source id, bucket) are
//! validated at startup; a service with an incomplete configuration must
//! fail fast rather than limp along.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration (optional cache)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Object store configuration (uploads bucket)
    pub storage: StorageConfig,

    /// Knowledge engine configuration
    pub engine: EngineConfig,

    /// Ingestion worker configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; caching is disabled when absent
    pub url: Option<String>,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Uploads bucket name
    pub bucket: String,

    /// Key prefix for uploaded documents
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Allowed file extensions (lowercase, no dot)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Maximum upload size in megabytes
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Presigned URL expiry in seconds
    #[serde(default = "default_presign_expiry")]
    pub presign_expiry_secs: u64,
}

impl StorageConfig {
    /// Maximum upload size in bytes
    pub fn max_file_size_bytes(&self) -> i64 {
        (self.max_file_size_mb * 1024 * 1024) as i64
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Knowledge engine API base URL
    pub base_url: String,

    /// Knowledge base identifier
    pub knowledge_base_id: String,

    /// Data source identifier
    pub data_source_id: String,

    /// API key for the engine (optional)
    pub api_key: Option<String>,

    /// Generation model identifier
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Request timeout in seconds (status checks and retrieval)
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,

    /// Retrieval retries on transient upstream errors
    #[serde(default = "default_retrieval_retries")]
    pub retrieval_retries: u32,

    /// Default number of passages per query
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Upper bound on requested passages per query
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Maximum question length in characters
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    /// SQS queue URL for object-created events (and deferred retries)
    pub events_queue_url: Option<String>,

    /// Maximum job-start attempts when the engine reports a running job
    #[serde(default = "default_max_start_attempts")]
    pub max_start_attempts: u32,

    /// Base delay for the deferred-retry backoff, in seconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    /// Poll interval for running ingestion jobs, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Give up and fail documents stuck in processing after this long
    #[serde(default = "default_max_processing")]
    pub max_processing_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            events_queue_url: None,
            max_start_attempts: default_max_start_attempts(),
            retry_base_delay_secs: default_retry_base_delay(),
            poll_interval_secs: default_poll_interval(),
            max_processing_secs: default_max_processing(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// JWT secret used to validate bearer tokens
    pub jwt_secret: String,

    /// JWT expiration in seconds (token issuance in tests/tools)
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_ttl() -> u64 { 300 }
fn default_key_prefix() -> String { "documents/".to_string() }
fn default_allowed_extensions() -> Vec<String> {
    ["pdf", "docx", "doc", "txt", "md", "csv", "json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_file_size_mb() -> u64 { 100 }
fn default_presign_expiry() -> u64 { 900 }
fn default_model_id() -> String { "anthropic.claude-3-haiku".to_string() }
fn default_engine_timeout() -> u64 { 30 }
fn default_retrieval_retries() -> u32 { 2 }
fn default_top_k() -> usize { 5 }
fn default_max_top_k() -> usize { 25 }
fn default_max_question_chars() -> usize { 2000 }
fn default_max_start_attempts() -> u32 { 5 }
fn default_retry_base_delay() -> u64 { 30 }
fn default_poll_interval() -> u64 { 30 }
fn default_max_processing() -> u64 { 3600 }
fn default_jwt_expiration() -> u64 { 3600 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "docharbor".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configurations missing required identifiers
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn required(name: &str, value: &str) -> Result<(), ConfigError> {
            if value.trim().is_empty() {
                Err(ConfigError::Message(format!("{} must not be empty", name)))
            } else {
                Ok(())
            }
        }

        required("engine.knowledge_base_id", &self.engine.knowledge_base_id)?;
        required("engine.data_source_id", &self.engine.data_source_id)?;
        required("engine.base_url", &self.engine.base_url)?;
        required("storage.bucket", &self.storage.bucket)?;
        required("auth.jwt_secret", &self.auth.jwt_secret)?;

        if self.storage.allowed_extensions.is_empty() {
            return Err(ConfigError::Message(
                "storage.allowed_extensions must not be empty".into(),
            ));
        }
        if self.storage.max_file_size_mb == 0 {
            return Err(ConfigError::Message(
                "storage.max_file_size_mb must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/docharbor".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            redis: RedisConfig::default(),
            storage: StorageConfig {
                bucket: "docharbor-uploads".to_string(),
                key_prefix: default_key_prefix(),
                allowed_extensions: default_allowed_extensions(),
                max_file_size_mb: default_max_file_size_mb(),
                presign_expiry_secs: default_presign_expiry(),
            },
            engine: EngineConfig {
                base_url: "http://localhost:9400".to_string(),
                knowledge_base_id: "kb-local".to_string(),
                data_source_id: "ds-local".to_string(),
                api_key: None,
                model_id: default_model_id(),
                timeout_secs: default_engine_timeout(),
                retrieval_retries: default_retrieval_retries(),
                default_top_k: default_top_k(),
                max_top_k: default_max_top_k(),
                max_question_chars: default_max_question_chars(),
            },
            ingest: IngestConfig::default(),
            auth: AuthConfig {
                jwt_secret: "local-development-secret".to_string(),
                jwt_expiration_secs: default_jwt_expiration(),
            },
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.max_file_size_mb, 100);
        assert_eq!(config.storage.presign_expiry_secs, 900);
        assert!(config.storage.allowed_extensions.contains(&"pdf".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_file_size_bytes() {
        let config = AppConfig::default();
        assert_eq!(config.storage.max_file_size_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_missing_knowledge_base() {
        let mut config = AppConfig::default();
        config.engine.knowledge_base_id = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_allow_list() {
        let mut config = AppConfig::default();
        config.storage.allowed_extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/docharbor");
    }
}
