use std::path::PathBuf;

use tracing::{error, info, warn};

use super::{
    intake::StagedFile,
    pipeline::{remove_local, RemoteObject, UploadPipeline},
};
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq)]
enum UploadState {
    Staged,
    Uploading,
    Committed(RemoteObject),
    Failed,
    RolledBack,
}

#[derive(Debug)]
struct Entry {
    local: PathBuf,
    state: UploadState,
}

/// Rollback list for the uploads of a single account operation.
///
/// Every staged file the operation owns is tracked here. The operation ends by
/// handing its result to [`UploadScope::finish`]: on success remote objects are
/// kept, on error every committed object is deleted. Local files are removed in
/// both cases. A scope dropped without `finish` rolls back on a background task.
pub struct UploadScope {
    pipeline: UploadPipeline,
    entries: Vec<Entry>,
    finished: bool,
}

impl UploadScope {
    pub fn new(pipeline: UploadPipeline) -> Self {
        Self {
            pipeline,
            entries: Vec::new(),
            finished: false,
        }
    }

    /// Takes ownership of a staged file's local copy.
    pub fn track(&mut self, file: &StagedFile) -> usize {
        if let Some(idx) = self.entries.iter().position(|e| e.local == file.path) {
            return idx;
        }
        self.entries.push(Entry {
            local: file.path.clone(),
            state: UploadState::Staged,
        });
        self.entries.len() - 1
    }

    pub async fn upload(&mut self, file: &StagedFile, folder: &str) -> AppResult<RemoteObject> {
        let idx = self.track(file);
        self.entries[idx].state = UploadState::Uploading;
        match self.pipeline.upload(file, folder).await {
            Ok(obj) => {
                self.entries[idx].state = UploadState::Committed(obj.clone());
                Ok(obj)
            }
            Err(e) => {
                self.entries[idx].state = UploadState::Failed;
                Err(e)
            }
        }
    }

    /// Single exit point of the owning operation. Cleanup never replaces `result`.
    pub async fn finish<T>(mut self, result: AppResult<T>) -> AppResult<T> {
        self.finished = true;
        let entries = std::mem::take(&mut self.entries);
        match &result {
            Ok(_) => release(entries).await,
            Err(e) => {
                warn!(error = %e, "operation failed; rolling back uploads");
                let done = rollback(&self.pipeline, entries).await;
                info!(rolled_back = rolled_back(&done), "uploads rolled back");
            }
        }
        result
    }
}

async fn release(entries: Vec<Entry>) {
    for entry in entries {
        if let Err(e) = remove_local(&entry.local).await {
            warn!(error = %e, path = %entry.local.display(), "failed to delete staged file");
        }
    }
}

fn rolled_back(entries: &[Entry]) -> usize {
    entries
        .iter()
        .filter(|e| e.state == UploadState::RolledBack)
        .count()
}

async fn rollback(pipeline: &UploadPipeline, entries: Vec<Entry>) -> Vec<Entry> {
    let mut done = Vec::with_capacity(entries.len());
    for mut entry in entries {
        if let UploadState::Committed(obj) = &entry.state {
            if let Err(e) = pipeline.delete_remote(&obj.key).await {
                error!(error = %e, key = %obj.key, "rollback could not delete remote object");
            }
            entry.state = UploadState::RolledBack;
        }
        if let Err(e) = remove_local(&entry.local).await {
            warn!(error = %e, path = %entry.local.display(), "failed to delete staged file");
        }
        done.push(entry);
    }
    done
}

impl Drop for UploadScope {
    fn drop(&mut self) {
        if self.finished || self.entries.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.entries);
        warn!(count = entries.len(), "upload scope dropped unfinished; rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pipeline = self.pipeline.clone();
                handle.spawn(async move {
                    let done = rollback(&pipeline, entries).await;
                    info!(rolled_back = rolled_back(&done), "uploads of dropped scope rolled back");
                });
            }
            Err(_) => {
                for entry in entries {
                    let _ = std::fs::remove_file(&entry.local);
                }
            }
        }
    }
}
