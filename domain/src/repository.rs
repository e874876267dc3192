use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::keys::{article_key, ARTICLE_PATTERN, COUNTER_KEY};
use crate::validate::{validate_new_article, validate_patch, IMAGE_REQUIRED};
use crate::{
    Article, ArticleId, ArticlePatch, AssetStore, Clock, CoreError, KeyValueStore, NewArticle,
};

/// Maps articles onto key-value store operations.
///
/// Generic over the store, the asset store and the clock; all three are
/// injected at construction. Ids come from the store's atomic counter, so
/// uniqueness holds across processes sharing the store. Writing the image
/// and writing the record are separate steps with no rollback between them.
pub struct ArticleRepository<S: KeyValueStore, A: AssetStore, C: Clock> {
    store: S,
    assets: A,
    clock: C,
}

impl<S: KeyValueStore, A: AssetStore, C: Clock> ArticleRepository<S, A, C> {
    pub fn new(store: S, assets: A, clock: C) -> Self {
        Self {
            store,
            assets,
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn assets(&self) -> &A {
        &self.assets
    }

    /// Every article whose record can be read and decoded, ordered by id.
    ///
    /// Best effort: records deleted between the scan and the fetch, records
    /// that fail to decode, and individual fetch errors are skipped.
    pub async fn list(&self) -> Result<Vec<Article>, CoreError> {
        let keys = self.store.keys(ARTICLE_PATTERN).await?;
        let mut articles = Vec::with_capacity(keys.len());
        for key in keys {
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!(%key, "article vanished during scan");
                    continue;
                }
                Err(e) => {
                    warn!(%key, err = ?e, "skipping unreadable article");
                    continue;
                }
            };
            match decode(&raw) {
                Ok(article) => articles.push(article),
                Err(e) => warn!(%key, err = %e, "skipping malformed article"),
            }
        }
        articles.sort_by(|a, b| a.id.numeric_key().cmp(&b.id.numeric_key()));
        Ok(articles)
    }

    pub async fn get(&self, id: &ArticleId) -> Result<Article, CoreError> {
        self.load(id).await
    }

    /// Create an article: validate, save the image, allocate an id, store the
    /// record. A failure after the image is saved leaves the file behind; a
    /// failure writing the record also burns the allocated id.
    pub async fn create(&self, input: NewArticle) -> Result<Article, CoreError> {
        validate_new_article(&input)?;
        let image = input
            .image
            .ok_or_else(|| CoreError::ValidationFailed(IMAGE_REQUIRED.into()))?;

        let image_path = self.assets.save(&image).await?;
        let id = ArticleId::from_counter(self.store.increment(COUNTER_KEY).await?)?;

        let article = Article {
            id,
            title: input.title,
            excerpt: input.excerpt,
            content: input.content,
            image: image_path,
            reg_date: DateTime::<Utc>::from(self.clock.now()),
        };
        self.persist(&article).await?;
        info!(id = %article.id, image = %article.image, "article created");
        Ok(article)
    }

    /// Apply a partial update. A new image is written before the record; the
    /// previous image is removed only after the record is stored and only if
    /// it lives at a different path.
    pub async fn update(&self, id: &ArticleId, patch: ArticlePatch) -> Result<Article, CoreError> {
        validate_patch(&patch)?;
        if patch.is_empty() {
            debug!(id = %id, "empty patch; nothing to write");
            return self.load(id).await;
        }
        let mut article = self.load(id).await?;

        if let Some(title) = patch.title {
            article.title = title;
        }
        if let Some(excerpt) = patch.excerpt {
            article.excerpt = excerpt;
        }
        if let Some(content) = patch.content {
            article.content = content;
        }

        let mut replaced_image = None;
        if let Some(image) = patch.image {
            let new_path = self.assets.save(&image).await?;
            let old_path = std::mem::replace(&mut article.image, new_path);
            if !old_path.is_empty() && old_path != article.image {
                replaced_image = Some(old_path);
            }
        }

        self.persist(&article).await?;

        if let Some(old_path) = replaced_image {
            self.remove_asset(&old_path).await;
        }
        info!(id = %article.id, "article updated");
        Ok(article)
    }

    /// Delete the record and, best effort, its image.
    pub async fn delete(&self, id: &ArticleId) -> Result<(), CoreError> {
        let article = self.load(id).await?;
        if !article.image.is_empty() {
            self.remove_asset(&article.image).await;
        }
        self.store.delete(&article_key(id)).await?;
        info!(id = %id, "article deleted");
        Ok(())
    }

    async fn load(&self, id: &ArticleId) -> Result<Article, CoreError> {
        match self.store.get(&article_key(id)).await? {
            Some(raw) => decode(&raw),
            None => Err(CoreError::NotFound),
        }
    }

    async fn persist(&self, article: &Article) -> Result<(), CoreError> {
        let raw = serde_json::to_string(article)
            .map_err(|e| CoreError::MalformedData(format!("encode article: {e}")))?;
        self.store.set(&article_key(&article.id), &raw).await
    }

    async fn remove_asset(&self, path: &str) {
        if let Err(e) = self.assets.remove(path).await {
            warn!(path, err = %e, "failed to remove image; continuing");
        }
    }
}

fn decode(raw: &str) -> Result<Article, CoreError> {
    serde_json::from_str(raw).map_err(|e| CoreError::MalformedData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_assets::InMemoryAssets;
    use crate::adapters::memory_store::InMemoryStore;
    use crate::ImageUpload;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    struct TestClock;
    impl Clock for TestClock {
        fn now(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        }
    }

    /// Store wrapper whose writes can be switched off to simulate an outage.
    struct FlakyStore {
        inner: InMemoryStore,
        fail_set: AtomicBool,
        fail_incr: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                fail_set: AtomicBool::new(false),
                fail_incr: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
            if self.fail_set.load(Ordering::SeqCst) {
                return Err(CoreError::StorageUnavailable("connection reset".into()));
            }
            self.inner.set(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<(), CoreError> {
            self.inner.delete(key).await
        }
        async fn increment(&self, key: &str) -> Result<i64, CoreError> {
            if self.fail_incr.load(Ordering::SeqCst) {
                return Err(CoreError::StorageUnavailable("connection reset".into()));
            }
            self.inner.increment(key).await
        }
        async fn keys(&self, pattern: &str) -> Result<Vec<String>, CoreError> {
            self.inner.keys(pattern).await
        }
        async fn ping(&self) -> Result<(), CoreError> {
            self.inner.ping().await
        }
    }

    type Repo = ArticleRepository<InMemoryStore, InMemoryAssets, TestClock>;

    fn repo() -> Repo {
        ArticleRepository::new(InMemoryStore::new(), InMemoryAssets::new(), TestClock)
    }

    fn image(name: &str) -> ImageUpload {
        ImageUpload {
            file_name: name.into(),
            bytes: name.as_bytes().to_vec(),
        }
    }

    fn new_article(title: &str, file: &str) -> NewArticle {
        NewArticle {
            title: title.into(),
            excerpt: format!("{title} excerpt"),
            content: format!("{title} content"),
            image: Some(image(file)),
        }
    }

    fn id(s: &str) -> ArticleId {
        ArticleId::new(s).unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let repo = repo();
        let created = repo
            .create(NewArticle {
                title: "A".into(),
                excerpt: "B".into(),
                content: "C".into(),
                image: Some(image("a.png")),
            })
            .await
            .unwrap();
        assert_eq!(created.id.as_str(), "1");
        assert_eq!(created.image, "uploads/image/a.png");
        assert_eq!(created.reg_date, DateTime::<Utc>::from(TestClock.now()));
        assert!(repo.assets().contains("uploads/image/a.png"));

        let fetched = repo.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn ids_increase_per_create() {
        let repo = repo();
        for expected in ["1", "2", "3"] {
            let a = repo.create(new_article("t", "x.png")).await.unwrap();
            assert_eq!(a.id.as_str(), expected);
        }
        assert_eq!(repo.store().get(COUNTER_KEY).await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_get_distinct_ids() {
        let repo = Arc::new(repo());
        let n = 64;
        let mut handles = Vec::new();
        for i in 0..n {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.create(new_article(&format!("t{i}"), &format!("{i}.png")))
                    .await
                    .map(|a| a.id)
            }));
        }
        let mut ids = HashSet::new();
        for h in handles {
            ids.insert(h.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), n);
        assert_eq!(repo.list().await.unwrap().len(), n);
    }

    #[tokio::test]
    async fn create_validation_touches_nothing() {
        let repo = repo();
        let err = repo
            .create(NewArticle {
                title: "A".into(),
                excerpt: String::new(),
                content: "C".into(),
                image: Some(image("a.png")),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed(_)));

        let err = repo
            .create(NewArticle {
                image: None,
                ..new_article("A", "a.png")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed(ref m) if m == IMAGE_REQUIRED));

        assert!(repo.assets().is_empty());
        assert_eq!(repo.store().get(COUNTER_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn record_write_failure_leaves_orphan_file_and_burns_id() {
        let repo = ArticleRepository::new(FlakyStore::new(), InMemoryAssets::new(), TestClock);
        repo.store().fail_set.store(true, Ordering::SeqCst);

        let err = repo.create(new_article("A", "orphan.png")).await.unwrap_err();
        assert!(matches!(err, CoreError::StorageUnavailable(_)));
        assert!(repo.assets().contains("uploads/image/orphan.png"));

        repo.store().fail_set.store(false, Ordering::SeqCst);
        let next = repo.create(new_article("B", "b.png")).await.unwrap();
        assert_eq!(next.id.as_str(), "2");
    }

    #[tokio::test]
    async fn counter_failure_leaves_orphan_file_only() {
        let repo = ArticleRepository::new(FlakyStore::new(), InMemoryAssets::new(), TestClock);
        repo.store().fail_incr.store(true, Ordering::SeqCst);

        let err = repo.create(new_article("A", "a.png")).await.unwrap_err();
        assert!(matches!(err, CoreError::StorageUnavailable(_)));
        assert!(repo.assets().contains("uploads/image/a.png"));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_distinguishes_missing_from_malformed() {
        let repo = repo();
        assert!(matches!(repo.get(&id("9")).await, Err(CoreError::NotFound)));

        repo.store().set("article:9", "{not json").await.unwrap();
        assert!(matches!(
            repo.get(&id("9")).await,
            Err(CoreError::MalformedData(_))
        ));
    }

    #[tokio::test]
    async fn empty_patch_leaves_record_unchanged() {
        let repo = repo();
        let created = repo.create(new_article("A", "a.png")).await.unwrap();
        let updated = repo
            .update(&created.id, ArticlePatch::default())
            .await
            .unwrap();
        assert_eq!(updated, created);
        assert_eq!(repo.get(&created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn single_field_patch_changes_only_that_field() {
        let repo = repo();
        let created = repo.create(new_article("A", "a.png")).await.unwrap();
        let updated = repo
            .update(
                &created.id,
                ArticlePatch {
                    excerpt: Some("new excerpt".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.excerpt, "new excerpt");
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.content, created.content);
        assert_eq!(updated.image, created.image);
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.reg_date, created.reg_date);
    }

    #[tokio::test]
    async fn patch_with_empty_text_is_rejected_before_lookup() {
        let repo = repo();
        let err = repo
            .update(
                &id("1"),
                ArticlePatch {
                    title: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn update_replaces_image_and_removes_old_one() {
        let repo = repo();
        let created = repo.create(new_article("A", "old.png")).await.unwrap();
        let updated = repo
            .update(
                &created.id,
                ArticlePatch {
                    image: Some(image("new.png")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.image, "uploads/image/new.png");
        assert!(repo.assets().contains("uploads/image/new.png"));
        assert!(!repo.assets().contains("uploads/image/old.png"));
    }

    #[tokio::test]
    async fn update_with_same_image_name_keeps_new_file() {
        let repo = repo();
        let created = repo.create(new_article("A", "same.png")).await.unwrap();
        let replacement = ImageUpload {
            file_name: "same.png".into(),
            bytes: vec![9, 9, 9],
        };
        repo.update(
            &created.id,
            ArticlePatch {
                image: Some(replacement),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            repo.assets().read("uploads/image/same.png"),
            Some(vec![9, 9, 9])
        );
    }

    #[tokio::test]
    async fn update_survives_missing_old_image() {
        let repo = repo();
        let created = repo.create(new_article("A", "old.png")).await.unwrap();
        repo.assets().remove("uploads/image/old.png").await.unwrap();

        let updated = repo
            .update(
                &created.id,
                ArticlePatch {
                    image: Some(image("new.png")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.image, "uploads/image/new.png");
        let stored = repo.get(&created.id).await.unwrap();
        assert_eq!(stored.image, "uploads/image/new.png");
        assert!(repo.assets().contains("uploads/image/new.png"));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let repo = repo();
        let err = repo
            .update(&id("5"), ArticlePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }

    #[tokio::test]
    async fn delete_removes_record_and_image() {
        let repo = repo();
        let created = repo.create(new_article("A", "a.png")).await.unwrap();
        repo.delete(&created.id).await.unwrap();
        assert!(matches!(repo.get(&created.id).await, Err(CoreError::NotFound)));
        assert!(!repo.assets().contains("uploads/image/a.png"));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let repo = repo();
        assert!(matches!(repo.delete(&id("1")).await, Err(CoreError::NotFound)));
    }

    #[tokio::test]
    async fn delete_survives_missing_image() {
        let repo = repo();
        let created = repo.create(new_article("A", "a.png")).await.unwrap();
        repo.assets().remove("uploads/image/a.png").await.unwrap();
        repo.delete(&created.id).await.unwrap();
        assert!(matches!(repo.get(&created.id).await, Err(CoreError::NotFound)));
    }

    #[tokio::test]
    async fn list_returns_all_in_id_order() {
        let repo = repo();
        for i in 0..3 {
            repo.create(new_article(&format!("t{i}"), &format!("{i}.png")))
                .await
                .unwrap();
        }
        let ids: Vec<String> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn list_skips_corrupted_records() {
        let repo = repo();
        for i in 0..3 {
            repo.create(new_article(&format!("t{i}"), &format!("{i}.png")))
                .await
                .unwrap();
        }
        repo.store().set("article:2", "garbage").await.unwrap();
        let ids: Vec<String> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn list_of_empty_store_is_empty() {
        assert!(repo().list().await.unwrap().is_empty());
    }
}
