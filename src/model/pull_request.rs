use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pull request, or a bare commit when `number` is 0.
///
/// Values are never mutated: merging produces a new `PullRequest` describing
/// the post-merge state. The `sha` is the correlation key used to find the
/// pipelines a change triggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub sha: String,
    pub repository: String,
    pub merged: bool,
    pub merged_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

impl PullRequest {
    pub fn new(number: u64, sha: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            number,
            sha: sha.into(),
            repository: repository.into(),
            merged: false,
            merged_at: None,
            url: None,
        }
    }

    /// Reference to a direct commit with no pull request attached.
    pub fn commit(sha: impl Into<String>, repository: impl Into<String>) -> Self {
        Self::new(0, sha, repository)
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn is_commit(&self) -> bool {
        self.number == 0
    }

    /// Post-merge view of this pull request, pointing at the merge commit.
    pub fn to_merged(&self, merge_sha: impl Into<String>, merged_at: DateTime<Utc>) -> Self {
        Self {
            number: self.number,
            sha: merge_sha.into(),
            repository: self.repository.clone(),
            merged: true,
            merged_at: Some(merged_at),
            url: self.url.clone(),
        }
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        if self.is_commit() {
            format!("commit {} in {}", short_sha(&self.sha), self.repository)
        } else {
            format!(
                "pull request #{} ({}) in {}",
                self.number,
                short_sha(&self.sha),
                self.repository
            )
        }
    }
}

pub fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Whether two commit references name the same commit, allowing either side
/// to be abbreviated.
pub fn same_revision(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.starts_with(b) || b.starts_with(a)
}
