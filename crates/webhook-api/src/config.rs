//! Service configuration: a top-level struct of sub-configs, each with a
//! `Default` giving the documented env-var defaults.

use serde::{Deserialize, Serialize};

/// Top-level ingestion-service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub webhooks: WebhookConfig,
    pub rate_limit: RateLimitSettings,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT").or_else(|_| std::env::var("METRICS_PORT")) {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        config
    }
}

/// HTTP server bind/behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Inherited request deadline honored by the ingestion endpoint.
    pub request_timeout_seconds: u64,
    pub enable_cors: bool,
    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_seconds: 60,
            enable_cors: true,
            enable_compression: true,
        }
    }
}

/// Ingestion endpoint path and signature tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub endpoint_path: String,
    pub signature_tolerance_seconds: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/webhooks/call_completed".to_string(),
            signature_tolerance_seconds: webhook_core::signer::DEFAULT_TOLERANCE_SECONDS,
        }
    }
}

/// Rate-limiter configuration for the ingestion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Requests per minute, burst capacity equal to this value.
    pub requests_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 1000,
        }
    }
}

/// Structured-logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
        }
    }
}
