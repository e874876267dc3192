//! redis-store — Redis implementation of the `KeyValueStore` port.
//!
//! Purpose
//! - Resolve the connection target from either a full connection URL or
//!   discrete host/port/credential settings (the URL wins when both are set).
//! - Hold one multiplexed `ConnectionManager`, cloned per call and shared by
//!   every request; no per-request connections.
//! - Refuse to hand out a store until a `PING` succeeds within the timeout.
//!
//! Transport security
//! - TLS is on unless `tls` is false, in both modes: a `redis://` URL is
//!   upgraded to `rediss://`, and certificates are verified.
//! - Verification is only skipped when `insecure_skip_verify` is set, which
//!   appends the `#insecure` fragment understood by the `redis` crate.
//!   Requesting that on a plaintext target is rejected.
//!
//! Notes
//! - Key enumeration uses `SCAN MATCH` in batches instead of `KEYS`, and
//!   removes the duplicates `SCAN` is allowed to return.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use domain::{CoreError, KeyValueStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

/// Upper bound on connection setup and the startup `PING`.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of keys requested per `SCAN` round trip.
const SCAN_BATCH_SIZE: usize = 100;

const INSECURE_FRAGMENT: &str = "#insecure";

/// Connection settings as read from the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RedisSettings {
    /// Full connection string. Takes priority over the discrete fields.
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    /// Use TLS. Applies to both the discrete target and a `redis://` or
    /// `rediss://` URL, whose scheme is rewritten to match.
    pub tls: bool,
    /// Skip certificate verification. Test environments only.
    pub insecure_skip_verify: bool,
}

/// Errors raised while establishing the store.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid redis target: {0}")]
    InvalidTarget(String),
    #[error("redis connection failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("redis did not answer within {0:?}")]
    Timeout(Duration),
}

/// Build the connection URL for `settings`.
///
/// The result may embed credentials; do not log it.
pub fn connection_url(settings: &RedisSettings) -> Result<String, ConnectError> {
    let mut url = match settings.url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => apply_tls_scheme(url.trim(), settings.tls),
        None => discrete_url(settings)?,
    };

    if settings.insecure_skip_verify {
        if !url.starts_with("rediss://") {
            return Err(ConnectError::InvalidTarget(
                "insecure_skip_verify requires a TLS (rediss://) target".into(),
            ));
        }
        if !url.ends_with(INSECURE_FRAGMENT) {
            if url.contains('#') {
                return Err(ConnectError::InvalidTarget(
                    "connection URL already carries a fragment".into(),
                ));
            }
            url.push_str(INSECURE_FRAGMENT);
        }
    }
    Ok(url)
}

/// `tls` decides the TCP scheme in URL mode too; socket URLs are left alone.
fn apply_tls_scheme(url: &str, tls: bool) -> String {
    match (url.strip_prefix("redis://"), url.strip_prefix("rediss://")) {
        (Some(rest), _) if tls => format!("rediss://{}", rest),
        (_, Some(rest)) if !tls => format!("redis://{}", rest),
        _ => url.to_string(),
    }
}

fn discrete_url(settings: &RedisSettings) -> Result<String, ConnectError> {
    let host = settings
        .host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConnectError::InvalidTarget("neither url nor host is set".into()))?;
    let scheme = if settings.tls { "rediss" } else { "redis" };
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    let username = settings.username.as_deref().filter(|u| !u.is_empty());
    let password = settings.password.as_deref().filter(|p| !p.is_empty());
    let auth = match (username, password) {
        (Some(u), Some(p)) => format!("{}:{}@", urlencoding::encode(u), urlencoding::encode(p)),
        (None, Some(p)) => format!(":{}@", urlencoding::encode(p)),
        (Some(u), None) => format!("{}@", urlencoding::encode(u)),
        (None, None) => String::new(),
    };
    Ok(format!(
        "{}://{}{}:{}/{}",
        scheme, auth, host, settings.port, settings.db
    ))
}

fn map_rediserr(e: redis::RedisError) -> CoreError {
    CoreError::StorageUnavailable(format!("redis error: {e}"))
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    ///
    /// No retries: a failure here is meant to stop process startup.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, ConnectError> {
        let url = connection_url(settings)?;
        if url.starts_with("rediss://") {
            // Another component may have installed a provider already.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
        let client = redis::Client::open(url.as_str())?;
        let conn = tokio::time::timeout(PING_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| ConnectError::Timeout(PING_TIMEOUT))??;
        let store = Self { conn };
        tokio::time::timeout(PING_TIMEOUT, store.raw_ping())
            .await
            .map_err(|_| ConnectError::Timeout(PING_TIMEOUT))??;
        info!(
            tls = url.starts_with("rediss://"),
            insecure = url.ends_with(INSECURE_FRAGMENT),
            "redis connection ready"
        );
        Ok(store)
    }

    async fn raw_ping(&self) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(reply = %pong, "redis ping");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(map_rediserr)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await.map_err(map_rediserr)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(map_rediserr)?;
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, CoreError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1i64).await.map_err(map_rediserr)?;
        Ok(value)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CoreError> {
        let mut conn = self.conn.clone();
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut conn)
                .await
                .map_err(map_rediserr)?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys.into_iter().collect())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        self.raw_ping().await.map_err(map_rediserr)
    }
}
