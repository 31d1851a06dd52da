use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{Auth, Token};
use crate::error::{HarnessError, Result};
use crate::http::ApiClient;
use crate::model::PullRequest;
use crate::retry::{retry, RetryOptions, Retryable};

use super::{FileChange, Git, GitType, Repositories};

/// GitLab binding on the REST v4 API (commits with actions, merge requests).
pub struct GitLabGit {
    api: ApiClient,
    repos: Repositories,
    merge_retry: RetryOptions,
}

#[derive(Deserialize)]
struct Commit {
    id: String,
}

#[derive(Deserialize)]
struct MergeRequest {
    iid: u64,
    sha: Option<String>,
    web_url: Option<String>,
    merge_commit_sha: Option<String>,
}

impl GitLabGit {
    /// # Arguments
    ///
    /// * `base_url` - GitLab instance base URL (e.g., <https://gitlab.com>)
    /// * `repos` - Source and GitOps repositories; `owner` is the group path
    /// * `token` - Personal or project access token
    pub fn new(base_url: &str, repos: Repositories, token: Option<Token>) -> Result<Self> {
        let api_url = format!("{}/api/v4/", base_url.trim_end_matches('/'));
        Ok(Self {
            api: ApiClient::new(&api_url, Auth::bearer(token))?,
            repos,
            merge_retry: RetryOptions::new(10, Duration::from_secs(3), Duration::from_secs(15)),
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.api = self.api.with_retry(retry.clone());
        self.merge_retry = retry;
        self
    }

    fn project_path(&self, repository: &str) -> String {
        let id = format!("{}/{repository}", self.repos.owner);
        format!("projects/{}", urlencoding::encode(&id))
    }
}

#[async_trait]
impl Git for GitLabGit {
    fn git_type(&self) -> GitType {
        GitType::Gitlab
    }

    fn repositories(&self) -> &Repositories {
        &self.repos
    }

    async fn get_commit_sha(&self, repository: &str, branch: &str) -> Result<String> {
        let commit: Commit = self
            .api
            .get_json(
                &format!(
                    "{}/repository/commits/{}",
                    self.project_path(repository),
                    urlencoding::encode(branch)
                ),
                &[],
            )
            .await?;
        Ok(commit.id)
    }

    async fn read_file(&self, repository: &str, branch: &str, path: &str) -> Result<String> {
        self.api
            .get_text(
                &format!(
                    "{}/repository/files/{}/raw",
                    self.project_path(repository),
                    urlencoding::encode(path)
                ),
                &[("ref", branch.to_string())],
            )
            .await
    }

    async fn commit_file(
        &self,
        repository: &str,
        branch: &str,
        base: &str,
        change: &FileChange,
        message: &str,
    ) -> Result<String> {
        let mut body = json!({
            "branch": branch,
            "commit_message": message,
            "actions": [{
                "action": if change.create { "create" } else { "update" },
                "file_path": change.path,
                "content": change.content,
            }],
        });
        if branch != base {
            body["start_branch"] = json!(base);
        }

        let commit: Commit = self
            .api
            .send_json(
                Method::POST,
                &format!("{}/repository/commits", self.project_path(repository)),
                &body,
            )
            .await?;
        Ok(commit.id)
    }

    async fn open_pull_request(
        &self,
        repository: &str,
        head: &str,
        base: &str,
        title: &str,
    ) -> Result<PullRequest> {
        let mr: MergeRequest = self
            .api
            .send_json(
                Method::POST,
                &format!("{}/merge_requests", self.project_path(repository)),
                &json!({
                    "source_branch": head,
                    "target_branch": base,
                    "title": title,
                    "remove_source_branch": true,
                }),
            )
            .await?;

        // A freshly created merge request may not report its head yet
        let sha = match mr.sha {
            Some(sha) => sha,
            None => self.get_commit_sha(repository, head).await?,
        };

        Ok(PullRequest::new(mr.iid, sha, repository).with_url(mr.web_url))
    }

    /// Merges a merge request, waiting out GitLab's mergeability check.
    ///
    /// Right after creation GitLab answers 405/406/422 until it has computed
    /// whether the branch can be merged; those answers are retried.
    async fn merge_pull_request(&self, pull_request: &PullRequest) -> Result<PullRequest> {
        let path = format!(
            "{}/merge_requests/{}/merge",
            self.project_path(&pull_request.repository),
            pull_request.number
        );

        let mr: MergeRequest = retry("merge request merge", &self.merge_retry, |attempt| {
            let path = path.clone();
            async move {
                debug!("Merging !{} (attempt {attempt})", pull_request.number);
                let result: Result<MergeRequest> = self
                    .api
                    .send_json(
                        Method::PUT,
                        &path,
                        &json!({ "should_remove_source_branch": true }),
                    )
                    .await;
                match result {
                    Err(e @ HarnessError::Api { status: 405 | 406 | 422, .. }) => {
                        Retryable::Continue(e)
                    }
                    other => Retryable::from_result(other),
                }
            }
        })
        .await?;

        let merge_sha = mr
            .merge_commit_sha
            .or(mr.sha)
            .ok_or_else(|| HarnessError::Api {
                status: 200,
                message: format!("merge request !{} reported no merge commit", mr.iid),
                code: None,
            })?;

        Ok(pull_request.to_merged(merge_sha, Utc::now()))
    }
}
