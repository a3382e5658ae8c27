//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Pipeline configuration for one digest run.
#[derive(Debug, Clone)]
pub struct DigestConfig {
    /// Recipients processed per invocation.
    pub batch_size: usize,
    /// Deadline for a single summarization call.
    pub summary_timeout: Duration,
    /// Minimum gap between the start of consecutive sends.
    pub send_interval: Duration,
    /// Maximum topics per free-tier digest.
    pub free_topic_quota: usize,
    /// Maximum topics per pro-tier digest.
    pub pro_topic_quota: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            summary_timeout: Duration::from_secs(15),
            send_interval: Duration::from_millis(550), // provider limit: 2 req/s
            free_topic_quota: 3,
            pro_topic_quota: 10,
        }
    }
}

impl DigestConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let batch_size = env_parse("DIGEST_BATCH_SIZE", defaults.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DIGEST_BATCH_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            batch_size,
            summary_timeout: Duration::from_secs(env_parse(
                "DIGEST_SUMMARY_TIMEOUT_SECS",
                defaults.summary_timeout.as_secs(),
            )?),
            send_interval: Duration::from_millis(env_parse(
                "DIGEST_SEND_INTERVAL_MS",
                defaults.send_interval.as_millis() as u64,
            )?),
            free_topic_quota: env_parse("DIGEST_FREE_TOPIC_QUOTA", defaults.free_topic_quota)?,
            pro_topic_quota: env_parse("DIGEST_PRO_TOPIC_QUOTA", defaults.pro_topic_quota)?,
        })
    }
}

/// Service-level configuration: HTTP surface, storage, scheduling.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    /// Shared secret required on the run endpoint.
    pub cron_secret: SecretString,
    /// Base URL this service is reachable at, used for self re-invocation.
    pub public_url: Option<String>,
    /// Cron expression for starting a fresh chain.
    pub schedule: Option<String>,
    /// TTL for the content cache.
    pub content_cache_ttl: Duration,
    /// Directory for rolling log files.
    pub log_dir: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // A blank secret would let blank credentials through.
        let cron_secret = env_required("DIGEST_CRON_SECRET")?;

        Ok(Self {
            port: env_parse("DIGEST_PORT", 8080)?,
            db_path: std::env::var("DIGEST_DB_PATH")
                .unwrap_or_else(|_| "./data/digest.db".to_string()),
            cron_secret: SecretString::from(cron_secret),
            public_url: env_opt("DIGEST_PUBLIC_URL"),
            schedule: env_opt("DIGEST_SCHEDULE"),
            content_cache_ttl: Duration::from_secs(env_parse(
                "DIGEST_CONTENT_CACHE_TTL_SECS",
                900,
            )?),
            log_dir: env_opt("DIGEST_LOG_DIR"),
        })
    }
}

/// Read a non-empty env var.
pub(crate) fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a non-empty env var, failing when it is unset or blank.
pub(crate) fn env_required(key: &str) -> Result<String, ConfigError> {
    env_opt(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an env var, using `default` when it is unset.
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
