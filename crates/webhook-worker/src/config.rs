//! Worker configuration, read from the env vars named in the external
//! interfaces design: `DATABASE_URL`, `WORKER_POLL_INTERVAL`,
//! `WORKER_BATCH_SIZE`, `WORKER_TIMEOUT`, `RETRY_BASE_DELAY`,
//! `RETRY_MAX_DELAY`, `RETRY_MAX_ATTEMPTS`, `HTTP_TIMEOUT`, `HTTP_POOL_SIZE`,
//! `MAX_CONCURRENT_DELIVERIES`, `LOG_LEVEL`, `METRICS_PORT`,
//! `AUDIT_LOG_ENABLED`.

use std::time::Duration;

use webhook_core::retry::RetryPolicy;

use crate::errors::WorkerError;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub poll_interval: Duration,
    pub batch_size: u32,
    pub worker_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub http_timeout: Duration,
    pub http_pool_size: usize,
    pub max_concurrent_deliveries: usize,
    pub log_level: String,
    pub metrics_port: u16,
    pub audit_log_enabled: bool,
    /// Grace period on SIGINT/SIGTERM before in-flight deliveries are
    /// abandoned to the startup reaper.
    pub shutdown_grace_period: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/webhooks".to_string(),
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            worker_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            http_timeout: Duration::from_secs(30),
            http_pool_size: 10,
            max_concurrent_deliveries: 10,
            log_level: "info".to_string(),
            metrics_port: 9090,
            audit_log_enabled: true,
            shutdown_grace_period: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Build configuration from the environment, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Result<Self, WorkerError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| WorkerError::Configuration("DATABASE_URL is required".to_string()))?;
        let mut config = Self { database_url, ..Self::default() };

        if let Some(v) = env_u64("WORKER_POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u32("WORKER_BATCH_SIZE") {
            config.batch_size = v;
        }
        if let Some(v) = env_u64("WORKER_TIMEOUT") {
            config.worker_timeout = Duration::from_secs(v);
        }

        let mut base_delay = config.retry_policy.base_delay;
        let mut max_delay = config.retry_policy.max_delay;
        let mut max_attempts = config.retry_policy.max_attempts;
        if let Some(v) = env_u64("RETRY_BASE_DELAY") {
            base_delay = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("RETRY_MAX_DELAY") {
            max_delay = Duration::from_secs(v);
        }
        if let Some(v) = env_u32("RETRY_MAX_ATTEMPTS") {
            max_attempts = v;
        }
        config.retry_policy = RetryPolicy::new(base_delay, max_delay, max_attempts);

        if let Some(v) = env_u64("HTTP_TIMEOUT") {
            config.http_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_u32("HTTP_POOL_SIZE") {
            config.http_pool_size = v as usize;
        }
        if let Some(v) = env_u32("MAX_CONCURRENT_DELIVERIES") {
            config.max_concurrent_deliveries = v as usize;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(v) = env_u32("METRICS_PORT") {
            config.metrics_port = v as u16;
        }
        if let Ok(flag) = std::env::var("AUDIT_LOG_ENABLED") {
            config.audit_log_enabled = flag != "false" && flag != "0";
        }

        Ok(config)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
