/// Attachment storage on the local filesystem
///
/// Files are written flat under one root directory with a random name that
/// keeps the client's extension. Posts refer to them by `<url_prefix>/<name>`.
use std::path::{Component, Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
    url_prefix: String,
}

/// Random file name carrying over the extension of `original_name`.
///
/// Extensions are lowercased and anything outside `[a-z0-9]` is dropped, so
/// the result is always a single safe path segment.
pub fn generated_name(original_name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let extension = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ext.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect::<String>()
        })
        .filter(|ext| !ext.is_empty());

    match extension {
        Some(ext) => format!("{id}.{ext}"),
        None => id,
    }
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Persist `bytes` under a fresh name and return its reference path.
    pub async fn store(&self, bytes: &[u8], original_name: &str) -> AppResult<String> {
        tokio::fs::create_dir_all(&self.root).await?;

        let name = generated_name(original_name);
        let path = self.root.join(&name);

        // create_new: a name collision must never clobber an existing file
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;

        tracing::debug!(path = %path.display(), size = bytes.len(), "attachment stored");

        Ok(format!("{}/{}", self.url_prefix, name))
    }

    /// Delete the file behind `reference`.
    ///
    /// Returns `Ok(false)` when there was nothing to delete, including
    /// references that do not point into this store.
    pub async fn remove(&self, reference: &str) -> AppResult<bool> {
        let Some(path) = self.resolve(reference) else {
            tracing::debug!(reference, "attachment reference outside the uploads root");
            return Ok(false);
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "attachment removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Map a reference path back to the file it names.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let name = reference
            .strip_prefix(&self.url_prefix)?
            .strip_prefix('/')?;

        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => Some(self.root.join(segment)),
            _ => None,
        }
    }
}
