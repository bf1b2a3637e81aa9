use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use axum::extract::Multipart;
use tracing::{debug, warn};
use uuid::Uuid;

use super::pipeline::remove_local;
use crate::error::{AppError, AppResult};

/// A request file written to the transient upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub field: String,
    pub path: PathBuf,
    pub content_type: String,
}

/// Text fields and staged files of one multipart request.
#[derive(Debug, Default)]
pub struct StagedForm {
    fields: HashMap<String, String>,
    files: Vec<StagedFile>,
}

impl StagedForm {
    /// Text value of `name`, or an empty string when absent.
    pub fn text(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    pub fn take_file(&mut self, field: &str) -> Option<StagedFile> {
        let idx = self.files.iter().position(|f| f.field == field)?;
        Some(self.files.swap_remove(idx))
    }

    async fn discard(self) {
        for file in self.files {
            if let Err(e) = remove_local(&file.path).await {
                warn!(error = %e, path = %file.path.display(), "failed to discard staged file");
            }
        }
    }
}

/// Keeps a client-supplied file name safe to use as part of a local path.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .take(64)
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Reads a multipart body, writing the parts named in `file_fields` to `dir`.
///
/// Each file field may appear at most once. Empty file parts are treated as
/// absent. If anything fails midway, files already written are removed before
/// the error is returned.
pub async fn stage_multipart(
    mut mp: Multipart,
    dir: &Path,
    file_fields: &[&str],
) -> AppResult<StagedForm> {
    let mut form = StagedForm::default();
    match read_parts(&mut mp, dir, file_fields, &mut form).await {
        Ok(()) => Ok(form),
        Err(e) => {
            form.discard().await;
            Err(e)
        }
    }
}

async fn read_parts(
    mp: &mut Multipart,
    dir: &Path,
    file_fields: &[&str],
    form: &mut StagedForm,
) -> AppResult<()> {
    loop {
        let field = match mp.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "malformed multipart body");
                return Err(AppError::validation("Malformed multipart body"));
            }
        };
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field
                .text()
                .await
                .map_err(|_| AppError::validation(format!("Unreadable field {name}")))?;
            form.fields.insert(name, value);
            continue;
        };

        if !file_fields.contains(&name.as_str()) {
            debug!(field = %name, "ignoring unexpected file field");
            continue;
        }
        if form.files.iter().any(|f| f.field == name) {
            return Err(AppError::validation(format!("Only one {name} file is allowed")));
        }

        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".into());
        let data = field
            .bytes()
            .await
            .map_err(|_| AppError::validation(format!("Unreadable file {name}")))?;
        if data.is_empty() {
            continue;
        }

        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create upload dir {}", dir.display()))
            .map_err(AppError::Internal)?;
        let path = dir.join(format!("{}-{}", Uuid::new_v4(), sanitize_file_name(&file_name)));
        tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("stage {}", path.display()))
            .map_err(AppError::Internal)?;
        debug!(field = %name, path = %path.display(), bytes = data.len(), "file staged");

        form.files.push(StagedFile {
            field: name,
            path,
            content_type,
        });
    }
}
