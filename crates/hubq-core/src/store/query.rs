//! Listing filters and ordering.

use serde::{Deserialize, Serialize};

use crate::job::{DownloadJob, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Created,
    Status,
    RepositoryId,
    Size,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" | "created_at" => Some(SortKey::Created),
            "status" => Some(SortKey::Status),
            "repository_id" | "repo" => Some(SortKey::RepositoryId),
            "size" => Some(SortKey::Size),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Listing request. The default lists everything, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQuery {
    #[serde(default)]
    pub status: Option<JobStatus>,
    /// Case-insensitive substring over repository id or job id.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

impl JobQuery {
    pub fn matches(&self, job: &DownloadJob) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                job.spec.repository_id.to_lowercase().contains(&needle)
                    || job.id.to_string().contains(&needle)
            }
        }
    }

    /// Filter and sort in place. Ties are broken by job id in the same direction.
    pub fn apply(&self, jobs: &mut Vec<DownloadJob>) {
        jobs.retain(|j| self.matches(j));
        jobs.sort_by(|a, b| {
            let primary = match self.sort {
                SortKey::Created => a.created_at.cmp(&b.created_at),
                SortKey::Status => a.status.rank().cmp(&b.status.rank()),
                SortKey::RepositoryId => a
                    .spec
                    .repository_id
                    .to_lowercase()
                    .cmp(&b.spec.repository_id.to_lowercase()),
                // Unknown size sorts as smallest.
                SortKey::Size => a.progress.total_bytes.cmp(&b.progress.total_bytes),
            };
            let ord = primary.then_with(|| a.id.cmp(&b.id));
            match self.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }
}
