//! Configuration management for ReplyLens
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Upstream video platform configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Annotation oracle configuration
    #[serde(default)]
    pub annotation: AnnotationConfig,

    /// Enrichment worker pool configuration
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Pipeline run configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (a pipeline run happens inside one request)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Bearer token for operator routes; unset leaves them unmounted
    #[serde(default)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (`postgres://...` or `sqlite://...`)
    #[serde(default = "default_database_url")]
    pub url: String,

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

    /// Create tables and triggers on startup
    #[serde(default = "default_enabled")]
    pub bootstrap_schema: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// API base URL
    #[serde(default = "default_upstream_base")]
    pub api_base: String,

    /// Video page base used for the Referer header
    #[serde(default = "default_upstream_referer")]
    pub referer_base: String,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Metadata lookup timeout in seconds
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,

    /// Comment page timeout in seconds
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,

    /// Politeness delay between page fetches in milliseconds
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,

    /// Pages fetched when the caller does not ask for a number
    #[serde(default = "default_pages")]
    pub default_pages: u32,

    /// Upper bound on pages per run
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Comment listing display mode (3 = sorted by popularity)
    #[serde(default = "default_sort_mode")]
    pub sort_mode: u8,

    /// Credentials shorter than this are rejected
    #[serde(default = "default_min_credential_len")]
    pub min_credential_len: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnnotationConfig {
    /// Annotation provider: openai (any compatible endpoint), mock
    #[serde(default = "default_annotation_provider")]
    pub provider: String,

    /// API key for the annotation service
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_annotation_base")]
    pub api_base: String,

    /// Model to use
    #[serde(default = "default_annotation_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_annotation_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    /// Maximum simultaneously in-flight oracle calls
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Optional per-call deadline in milliseconds, unset means none
    pub call_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Minimum seconds between two accepted pipeline starts
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
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

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 600 }
fn default_database_url() -> String { "postgres://localhost/replylens".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_upstream_base() -> String { "https://api.bilibili.com".to_string() }
fn default_upstream_referer() -> String { "https://www.bilibili.com/video".to_string() }
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}
fn default_metadata_timeout() -> u64 { 5 }
fn default_page_timeout() -> u64 { 10 }
fn default_page_delay() -> u64 { 1200 }
fn default_pages() -> u32 { 3 }
fn default_max_pages() -> u32 { 20 }
fn default_sort_mode() -> u8 { 3 }
fn default_min_credential_len() -> usize { 50 }
fn default_annotation_provider() -> String { "openai".to_string() }
fn default_annotation_base() -> String { "https://api.deepseek.com".to_string() }
fn default_annotation_model() -> String { crate::DEFAULT_ANNOTATION_MODEL.to_string() }
fn default_annotation_timeout() -> u64 { 30 }
fn default_temperature() -> f32 { 0.2 }
fn default_max_in_flight() -> usize { 15 }
fn default_cooldown() -> u64 { 10 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "replylens".to_string() }
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
            // e.g., APP__UPSTREAM__PAGE_DELAY_MS=1500
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Operator token, ignoring a blank value
    pub fn admin_token(&self) -> Option<&str> {
        self.server
            .admin_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Get the pipeline cooldown as Duration
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.pipeline.cooldown_secs)
    }
}

impl UpstreamConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    /// Clamp a requested page count into [1, max_pages]
    pub fn effective_pages(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_pages)
            .clamp(1, self.max_pages.max(1))
    }
}

impl EnrichmentConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            admin_token: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            bootstrap_schema: default_enabled(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: default_upstream_base(),
            referer_base: default_upstream_referer(),
            user_agent: default_user_agent(),
            metadata_timeout_secs: default_metadata_timeout(),
            page_timeout_secs: default_page_timeout(),
            page_delay_ms: default_page_delay(),
            default_pages: default_pages(),
            max_pages: default_max_pages(),
            sort_mode: default_sort_mode(),
            min_credential_len: default_min_credential_len(),
        }
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            provider: default_annotation_provider(),
            api_key: None,
            api_base: default_annotation_base(),
            model: default_annotation_model(),
            timeout_secs: default_annotation_timeout(),
            temperature: default_temperature(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            call_timeout_ms: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
        }
    }
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            upstream: UpstreamConfig::default(),
            annotation: AnnotationConfig::default(),
            enrichment: EnrichmentConfig::default(),
            pipeline: PipelineConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
