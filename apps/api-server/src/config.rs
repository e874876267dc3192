//! Centralized configuration for api-server.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time. A `.env` file, when
//! present, is loaded into the process environment before this runs.

use axum::http::HeaderValue;
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage (data lost on restart)
    Memory,
    /// Redis, reached through `REDIS_URL` or the discrete `REDIS_*` settings
    Redis,
}

impl StorageProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("memory") {
            Self::Memory
        } else {
            Self::Redis
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Redis connection settings. The URL, when set, wins over the discrete fields.
#[derive(Clone, Default)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    /// TLS for the discrete target and TCP URLs (default on)
    pub tls: bool,
    /// Skip certificate verification (test environments only)
    pub insecure_skip_verify: bool,
}

impl RedisConfig {
    /// Whether the resolved target talks plaintext. `REDIS_TLS` governs both
    /// the discrete target and `redis://`/`rediss://` URLs; socket URLs never
    /// use TLS.
    pub fn is_plaintext(&self) -> bool {
        match self.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) if !url.starts_with("redis://") && !url.starts_with("rediss://") => true,
            _ => !self.tls,
        }
    }
}

// Hand-written so the password never ends up in logs.
impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("db", &self.db)
            .field("tls", &self.tls)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields are validated at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// Route prefix for the article endpoints (default: /api/articles)
    pub api_prefix: String,
    /// Storage provider
    pub storage_provider: StorageProvider,
    /// Redis settings (used when storage_provider is Redis)
    pub redis: RedisConfig,
    /// Directory for uploaded images
    pub upload_dir: PathBuf,
    /// Request body limit in bytes
    pub max_upload_bytes: usize,
    /// CORS allow origin
    pub cors_allow_origin: HeaderValue,
    /// Log format
    pub log_format: LogFormat,
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Fails fast on invalid configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Port
        let port = parse_or(var("PORT"), "PORT", 8080u16)?;

        // Route prefix
        let prefix_raw = var("API_PREFIX").unwrap_or_else(|| "/api/articles".into());
        let api_prefix =
            http_common::normalize_prefix(&prefix_raw).ok_or_else(|| ConfigError {
                field: "API_PREFIX",
                message: format!("'{}' does not name a path below /", prefix_raw),
            })?;

        // Storage provider
        let storage_provider =
            StorageProvider::from_str(&var("STORAGE_PROVIDER").unwrap_or_else(|| "redis".into()));

        // Redis
        let redis = RedisConfig {
            url: var("REDIS_URL"),
            host: var("REDIS_HOST"),
            port: parse_or(var("REDIS_PORT"), "REDIS_PORT", 6379u16)?,
            username: var("REDIS_USERNAME"),
            password: var("REDIS_PASSWORD"),
            db: parse_or(var("REDIS_DB"), "REDIS_DB", 0i64)?,
            tls: http_common::parse_flag(var("REDIS_TLS").as_deref(), true),
            insecure_skip_verify: http_common::parse_flag(
                var("REDIS_INSECURE_SKIP_VERIFY").as_deref(),
                false,
            ),
        };

        // Validate: Redis storage needs a target
        if storage_provider == StorageProvider::Redis
            && redis.url.is_none()
            && redis.host.is_none()
        {
            return Err(ConfigError {
                field: "REDIS_URL",
                message: "REDIS_URL or REDIS_HOST is required when STORAGE_PROVIDER=redis".into(),
            });
        }

        // Upload directory
        let upload_dir = var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("uploads/image"));

        // Body limit
        let max_upload_mb = parse_or(var("MAX_UPLOAD_MB"), "MAX_UPLOAD_MB", 10usize)?;
        if max_upload_mb == 0 {
            return Err(ConfigError {
                field: "MAX_UPLOAD_MB",
                message: "must be at least 1".into(),
            });
        }
        let max_upload_bytes = max_upload_mb.saturating_mul(1024 * 1024);

        // CORS allow origin
        let cors_origin_str = var("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".into());
        let cors_allow_origin = if cors_origin_str == "*" {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(&cors_origin_str).map_err(|e| ConfigError {
                field: "CORS_ALLOW_ORIGIN",
                message: format!("Invalid header value '{}': {}", cors_origin_str, e),
            })?
        };

        // Log format
        let log_format = LogFormat::from_str(&var("LOG_FORMAT").unwrap_or_else(|| "pretty".into()));

        Ok(Self {
            port,
            api_prefix,
            storage_provider,
            redis,
            upload_dir,
            max_upload_bytes,
            cors_allow_origin,
            log_format,
        })
    }

    /// Log warnings about insecure configuration.
    pub fn warn_if_insecure(&self) {
        match self.storage_provider {
            StorageProvider::Memory => {
                tracing::warn!(
                    "STORAGE_PROVIDER=memory: articles are kept in process memory and lost on restart."
                );
            }
            StorageProvider::Redis => {
                if self.redis.insecure_skip_verify {
                    tracing::warn!(
                        "REDIS_INSECURE_SKIP_VERIFY is set: Redis TLS certificate verification \
                         is DISABLED. DO NOT USE IN PRODUCTION."
                    );
                }
                if self.redis.is_plaintext() {
                    tracing::warn!("Redis transport is not encrypted (REDIS_TLS=false or a socket URL).");
                }
            }
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    field: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(s) => s.trim().parse().map_err(|e| ConfigError {
            field,
            message: format!("Invalid value '{}': {}", s, e),
        }),
    }
}
