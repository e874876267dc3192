//! Domain library for the article service.
//!
//! Holds the article entity, the ports (traits) that storage adapters
//! implement, the key scheme, and the error taxonomy. Adapters and IO
//! concerns live in separate crates; only the in-memory test doubles under
//! [`adapters`] ship with the domain.

use std::fmt::{Display, Formatter};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decimal identifier of an article, as handed out by the store counter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArticleId(String);

impl ArticleId {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.is_empty() || !val.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidId(val));
        }
        Ok(Self(val))
    }

    /// Build an id from a freshly incremented counter value.
    ///
    /// The store counter starts at zero and `INCR` returns the new value, so
    /// anything below one means the counter key holds something unexpected.
    pub fn from_counter(value: i64) -> Result<Self, CoreError> {
        if value < 1 {
            return Err(CoreError::StorageUnavailable(format!(
                "id counter returned non-positive value {value}"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sort key that orders ids numerically without parsing into a fixed-width int.
    pub(crate) fn numeric_key(&self) -> (usize, &str) {
        let digits = self.0.trim_start_matches('0');
        (digits.len(), digits)
    }
}

impl Display for ArticleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArticleId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArticleId> for String {
    fn from(id: ArticleId) -> Self {
        id.0
    }
}

/// Stored article record. This is also the JSON exchange format written to
/// the store and returned to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub excerpt: String,
    pub content: String,
    /// Path of the uploaded image asset.
    pub image: String,
    /// Creation time. Older records without the field decode as the epoch.
    #[serde(default)]
    pub reg_date: DateTime<Utc>,
}

/// Raw uploaded image: client-supplied file name plus contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Input data for creating a new article. Every field is required; the image
/// is optional here only so that its absence can be reported as a
/// validation failure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewArticle {
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub image: Option<ImageUpload>,
}

/// Partial update. `None` leaves a field untouched; text fields cannot be
/// cleared, so `Some("")` is rejected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArticlePatch {
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub content: Option<String>,
    pub image: Option<ImageUpload>,
}

impl ArticlePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.excerpt.is_none()
            && self.content.is_none()
            && self.image.is_none()
    }
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Key/value/counter primitives offered by the backing store.
///
/// Implementations do no serialization and no validation. `increment` must
/// be atomic across concurrent callers: it is the only thing that keeps
/// article ids unique.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;
    async fn delete(&self, key: &str) -> Result<(), CoreError>;
    /// Increment the integer at `key` by one and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, CoreError>;
    /// All keys matching a glob pattern (`*`, `?`). Order is unspecified.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CoreError>;
    async fn ping(&self) -> Result<(), CoreError>;
}

/// Storage for uploaded image files.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Persist the upload and return the path recorded on the article.
    /// A name collision overwrites the existing asset.
    async fn save(&self, upload: &ImageUpload) -> Result<String, CoreError>;
    async fn remove(&self, path: &str) -> Result<(), CoreError>;
}

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("article not found")]
    NotFound,
    #[error("invalid article id: {0:?}")]
    InvalidId(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("malformed article data: {0}")]
    MalformedData(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("asset io failed: {0}")]
    AssetIoFailed(String),
}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{}", pkg, ver)
}

pub mod adapters;
pub mod keys;
pub mod repository;
pub mod validate;
