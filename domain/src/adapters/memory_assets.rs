use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::validate::upload_file_name;
use crate::{AssetStore, CoreError, ImageUpload};

/// Asset store that keeps uploads in a map keyed by their virtual path.
/// Removing a path that is not present fails, which lets tests exercise the
/// "asset removal failed" branches.
pub struct InMemoryAssets {
    dir: String,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryAssets {
    pub fn new() -> Self {
        Self::with_dir("uploads/image")
    }

    pub fn with_dir(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            files: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files
            .lock()
            .map(|files| files.contains_key(path))
            .unwrap_or(false)
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().ok()?.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryAssets {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetStore for InMemoryAssets {
    async fn save(&self, upload: &ImageUpload) -> Result<String, CoreError> {
        let name = upload_file_name(&upload.file_name)?;
        let path = format!("{}/{}", self.dir, name);
        self.files
            .lock()
            .map_err(|_| CoreError::AssetIoFailed("mutex poisoned".into()))?
            .insert(path.clone(), upload.bytes.clone());
        Ok(path)
    }

    async fn remove(&self, path: &str) -> Result<(), CoreError> {
        let removed = self
            .files
            .lock()
            .map_err(|_| CoreError::AssetIoFailed("mutex poisoned".into()))?
            .remove(path);
        match removed {
            Some(_) => Ok(()),
            None => Err(CoreError::AssetIoFailed(format!("no such asset: {}", path))),
        }
    }
}
