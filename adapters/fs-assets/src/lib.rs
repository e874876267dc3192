//! fs-assets — local-disk implementation of the `AssetStore` port.
//!
//! Uploaded images are written as `<dir>/<file name>`, where the file name is
//! the last path component of what the client sent. A second upload with the
//! same name overwrites the first. The directory is created on first save.
//!
//! Removal only touches paths inside the configured directory; a record whose
//! `image` field points elsewhere is refused rather than followed.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use domain::validate::upload_file_name;
use domain::{AssetStore, CoreError, ImageUpload};
use tracing::debug;

/// Asset store rooted at a directory on the local file system.
#[derive(Clone, Debug)]
pub struct LocalAssetStore {
    dir: PathBuf,
}

impl LocalAssetStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True when `path` names a file directly inside the upload directory.
    fn owns(&self, path: &Path) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        let no_dot_dot = path.components().all(|c| !matches!(c, Component::ParentDir));
        no_dot_dot && parent == self.dir && path.file_name().is_some()
    }
}

fn map_ioerr(action: &str, path: &Path, e: std::io::Error) -> CoreError {
    CoreError::AssetIoFailed(format!("{action} {}: {e}", path.display()))
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn save(&self, upload: &ImageUpload) -> Result<String, CoreError> {
        let name = upload_file_name(&upload.file_name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| map_ioerr("create dir", &self.dir, e))?;
        let path = self.dir.join(name);
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|e| map_ioerr("write", &path, e))?;
        debug!(path = %path.display(), bytes = upload.bytes.len(), "image saved");
        Ok(path.to_string_lossy().into_owned())
    }

    async fn remove(&self, path: &str) -> Result<(), CoreError> {
        let path = Path::new(path);
        if !self.owns(path) {
            return Err(CoreError::AssetIoFailed(format!(
                "refusing to remove {} outside {}",
                path.display(),
                self.dir.display()
            )));
        }
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| map_ioerr("remove", path, e))?;
        debug!(path = %path.display(), "image removed");
        Ok(())
    }
}
