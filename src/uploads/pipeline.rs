use std::{io, path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use bytes::Bytes;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::intake::StagedFile;
use crate::{
    error::{AppError, AppResult},
    storage::StorageClient,
};

/// A durable object created by an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub url: String,
}

/// Deletes a local file. A file that is already gone counts as deleted.
pub async fn remove_local(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[derive(Clone)]
pub struct UploadPipeline {
    storage: Arc<dyn StorageClient>,
    timeout: Duration,
}

impl UploadPipeline {
    pub fn new(storage: Arc<dyn StorageClient>, timeout: Duration) -> Self {
        Self { storage, timeout }
    }

    /// Pushes a staged file to remote storage under `folder/`.
    ///
    /// The local copy is deleted whatever the outcome.
    #[instrument(skip(self, file), fields(field = %file.field, path = %file.path.display()))]
    pub async fn upload(&self, file: &StagedFile, folder: &str) -> AppResult<RemoteObject> {
        let result = self.put(file, folder).await;
        if let Err(e) = remove_local(&file.path).await {
            warn!(error = %e, "failed to delete staged file");
        }
        result.map_err(|e| {
            warn!(error = %e, "upload failed");
            AppError::UploadFailed(e)
        })
    }

    async fn put(&self, file: &StagedFile, folder: &str) -> anyhow::Result<RemoteObject> {
        let body = tokio::fs::read(&file.path)
            .await
            .with_context(|| format!("read staged file {}", file.path.display()))?;
        anyhow::ensure!(!body.is_empty(), "staged file {} is empty", file.path.display());

        let ext = ext_from_mime(&file.content_type)
            .map(str::to_string)
            .or_else(|| {
                file.path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_ascii_lowercase)
            })
            .unwrap_or_else(|| "bin".to_string());
        let key = format!("{}/{}.{}", folder, Uuid::new_v4(), ext);

        let put = self
            .storage
            .put_object(&key, Bytes::from(body), &file.content_type);
        match tokio::time::timeout(self.timeout, put).await {
            Ok(res) => res.with_context(|| format!("put_object {}", key))?,
            Err(_) => {
                // The put may still have landed; try not to leave it behind.
                if let Err(e) = self.storage.delete_object(&key).await {
                    warn!(error = %e, key = %key, "cleanup after timed out put failed");
                }
                anyhow::bail!("put_object {} timed out after {:?}", key, self.timeout);
            }
        }

        info!(key = %key, "file uploaded");
        Ok(RemoteObject {
            url: self.storage.object_url(&key),
            key,
        })
    }

    pub async fn delete_remote(&self, key: &str) -> anyhow::Result<()> {
        self.storage
            .delete_object(key)
            .await
            .with_context(|| format!("delete_object {}", key))?;
        info!(key = %key, "remote object deleted");
        Ok(())
    }

    /// Deletes the object behind a URL previously returned by [`Self::upload`].
    /// URLs pointing elsewhere are left alone.
    pub async fn delete_by_url(&self, url: &str) -> anyhow::Result<()> {
        match self.storage.key_from_url(url) {
            Some(key) => self.delete_remote(&key).await,
            None => {
                warn!(url = %url, "not a managed object url; skipping delete");
                Ok(())
            }
        }
    }
}
