//! Store selection for api-server: in-memory or Redis (feature-gated).

use async_trait::async_trait;
use domain::adapters::memory_store::InMemoryStore;
use domain::{CoreError, KeyValueStore};

use crate::config::{Config, StorageProvider};

/// Local store abstraction supporting memory or redis.
#[derive(Clone)]
pub enum AnyStore {
    Memory(std::sync::Arc<InMemoryStore>),
    #[cfg(feature = "redis")]
    Redis(redis_store::RedisStore),
    /// Fails every call, as an unreachable server would.
    #[cfg(test)]
    Down,
}

impl AnyStore {
    pub fn memory() -> Self {
        Self::Memory(std::sync::Arc::new(InMemoryStore::new()))
    }

    #[cfg(feature = "redis")]
    async fn redis(cfg: &Config) -> Result<Self, redis_store::ConnectError> {
        let settings = redis_store::RedisSettings {
            url: cfg.redis.url.clone(),
            host: cfg.redis.host.clone(),
            port: cfg.redis.port,
            username: cfg.redis.username.clone(),
            password: cfg.redis.password.clone(),
            db: cfg.redis.db,
            tls: cfg.redis.tls,
            insecure_skip_verify: cfg.redis.insecure_skip_verify,
        };
        Ok(Self::Redis(redis_store::RedisStore::connect(&settings).await?))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "redis")]
            Self::Redis(_) => "redis",
            #[cfg(test)]
            Self::Down => "down",
        }
    }
}

/// Construct the store selected by config and feature flags.
///
/// A store that cannot be reached is an error; there is no fallback.
pub async fn build_store(cfg: &Config) -> Result<AnyStore, String> {
    match cfg.storage_provider {
        StorageProvider::Memory => Ok(AnyStore::memory()),
        #[cfg(feature = "redis")]
        StorageProvider::Redis => AnyStore::redis(cfg).await.map_err(|e| e.to_string()),
        #[cfg(not(feature = "redis"))]
        StorageProvider::Redis => {
            Err("STORAGE_PROVIDER=redis but api-server was built without the `redis` feature".into())
        }
    }
}

#[cfg(test)]
fn unreachable_store() -> CoreError {
    CoreError::StorageUnavailable("connection refused".into())
}

#[async_trait]
impl KeyValueStore for AnyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        match self {
            Self::Memory(s) => s.get(key).await,
            #[cfg(feature = "redis")]
            Self::Redis(s) => s.get(key).await,
            #[cfg(test)]
            Self::Down => Err(unreachable_store()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        match self {
            Self::Memory(s) => s.set(key, value).await,
            #[cfg(feature = "redis")]
            Self::Redis(s) => s.set(key, value).await,
            #[cfg(test)]
            Self::Down => Err(unreachable_store()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        match self {
            Self::Memory(s) => s.delete(key).await,
            #[cfg(feature = "redis")]
            Self::Redis(s) => s.delete(key).await,
            #[cfg(test)]
            Self::Down => Err(unreachable_store()),
        }
    }

    async fn increment(&self, key: &str) -> Result<i64, CoreError> {
        match self {
            Self::Memory(s) => s.increment(key).await,
            #[cfg(feature = "redis")]
            Self::Redis(s) => s.increment(key).await,
            #[cfg(test)]
            Self::Down => Err(unreachable_store()),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CoreError> {
        match self {
            Self::Memory(s) => s.keys(pattern).await,
            #[cfg(feature = "redis")]
            Self::Redis(s) => s.keys(pattern).await,
            #[cfg(test)]
            Self::Down => Err(unreachable_store()),
        }
    }

    async fn ping(&self) -> Result<(), CoreError> {
        match self {
            Self::Memory(s) => s.ping().await,
            #[cfg(feature = "redis")]
            Self::Redis(s) => s.ping().await,
            #[cfg(test)]
            Self::Down => Err(unreachable_store()),
        }
    }
}
