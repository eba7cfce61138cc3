//! Submission payload and its validation into a [`JobSpec`].

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::HubqError;
use crate::job::{JobSpec, RepoKind, SelectionMode};

fn default_true() -> bool {
    true
}

/// Submission payload as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub repository_id: String,
    #[serde(default)]
    pub repository_kind: RepoKind,
    /// Relative to the models directory; an absolute path must lie inside
    /// it. Defaults to the repository id with `/` replaced by `_`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub transfer_acceleration: bool,
    #[serde(default)]
    pub selection_mode: SelectionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

impl SubmitRequest {
    /// Full-repository request with defaults for everything else.
    pub fn new(repository_id: impl Into<String>) -> Self {
        Self {
            repository_id: repository_id.into(),
            repository_kind: RepoKind::Model,
            destination_dir: None,
            transfer_acceleration: true,
            selection_mode: SelectionMode::Full,
            revision: None,
            files: None,
        }
    }
}

fn check_repository_id(id: &str) -> Result<(), HubqError> {
    if id.is_empty() {
        return Err(HubqError::validation("repository_id is required"));
    }
    if id.chars().any(char::is_whitespace) {
        return Err(HubqError::validation(
            "repository_id must not contain whitespace",
        ));
    }
    let parts: Vec<&str> = id.split('/').collect();
    if parts.len() > 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(HubqError::validation(format!(
            "repository_id {id:?} must look like owner/name or name"
        )));
    }
    if parts.iter().any(|p| *p == "." || *p == "..") {
        return Err(HubqError::validation(format!(
            "repository_id {id:?} is not a valid name"
        )));
    }
    Ok(())
}

fn has_parent_dir(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

fn check_file(file: &str) -> Result<(), HubqError> {
    if file.is_empty() {
        return Err(HubqError::validation("file paths must not be empty"));
    }
    let path = Path::new(file);
    if path.is_absolute() || has_parent_dir(path) {
        return Err(HubqError::validation(format!(
            "file path {file:?} must be relative to the repository root"
        )));
    }
    Ok(())
}

fn resolve_destination(
    requested: Option<PathBuf>,
    repository_id: &str,
    models_dir: &Path,
) -> Result<PathBuf, HubqError> {
    let requested = requested.filter(|p| !p.as_os_str().is_empty());
    let destination = match requested {
        None => return Ok(models_dir.join(repository_id.replace('/', "_"))),
        Some(p) if p.is_absolute() => p,
        Some(p) => models_dir.join(p),
    };
    if has_parent_dir(&destination) || !destination.starts_with(models_dir) {
        return Err(HubqError::validation(format!(
            "destination {} escapes the models directory",
            destination.display()
        )));
    }
    if destination == models_dir {
        return Err(HubqError::validation(
            "destination must be a directory below the models directory",
        ));
    }
    Ok(destination)
}

/// Validate `req` and resolve it into an immutable spec.
pub fn build_spec(req: SubmitRequest, models_dir: &Path) -> Result<JobSpec, HubqError> {
    let repository_id = req.repository_id.trim().to_string();
    check_repository_id(&repository_id)?;

    let revision = req
        .revision
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let files: Vec<String> = req
        .files
        .unwrap_or_default()
        .into_iter()
        .map(|f| f.trim().to_string())
        .collect();

    match req.selection_mode {
        SelectionMode::Full | SelectionMode::Branch if !files.is_empty() => {
            return Err(HubqError::validation(
                "files are only accepted with selection_mode \"files\"",
            ));
        }
        SelectionMode::Branch if revision.is_none() => {
            return Err(HubqError::validation(
                "selection_mode \"branch\" requires a revision",
            ));
        }
        SelectionMode::Files if files.is_empty() => {
            return Err(HubqError::validation(
                "selection_mode \"files\" requires a non-empty file list",
            ));
        }
        SelectionMode::Files => {
            for f in &files {
                check_file(f)?;
            }
        }
        _ => {}
    }

    let destination = resolve_destination(req.destination_dir, &repository_id, models_dir)?;

    Ok(JobSpec {
        repository_id,
        repository_kind: req.repository_kind,
        revision,
        selection: req.selection_mode,
        files,
        destination,
        transfer_acceleration: req.transfer_acceleration,
    })
}
