//! Store key scheme for articles.
//!
//! Records live under `article:<id>`; the id counter is a single key outside
//! that namespace so a scan of `article:*` never sees it.

use crate::ArticleId;

/// Counter key incremented once per created article.
pub const COUNTER_KEY: &str = "article_id";

/// Prefix shared by every article record key.
pub const ARTICLE_PREFIX: &str = "article:";

/// Glob pattern matching every article record key.
pub const ARTICLE_PATTERN: &str = "article:*";

pub fn article_key(id: &ArticleId) -> String {
    format!("{}{}", ARTICLE_PREFIX, id.as_str())
}
