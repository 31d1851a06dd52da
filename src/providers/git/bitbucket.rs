use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{Auth, Token};
use crate::error::{HarnessError, Result};
use crate::http::ApiClient;
use crate::model::PullRequest;
use crate::retry::RetryOptions;

use super::{FileChange, Git, GitType, Repositories};

/// Bitbucket Cloud binding on the 2.0 REST API.
pub struct BitbucketGit {
    api: ApiClient,
    repos: Repositories,
}

#[derive(Deserialize)]
struct Branch {
    target: CommitHash,
}

#[derive(Deserialize)]
struct CommitHash {
    hash: String,
}

#[derive(Deserialize)]
struct PullRequestResponse {
    id: u64,
    links: Option<Links>,
}

#[derive(Deserialize)]
struct Links {
    html: Option<Href>,
}

#[derive(Deserialize)]
struct Href {
    href: String,
}

#[derive(Deserialize)]
struct MergeResponse {
    merge_commit: Option<CommitHash>,
}

impl BitbucketGit {
    /// # Arguments
    ///
    /// * `base_url` - API base URL (e.g., <https://api.bitbucket.org/2.0>)
    /// * `repos` - Source and GitOps repositories; `owner` is the workspace
    /// * `username` - Account the app password belongs to
    /// * `app_password` - Bitbucket app password
    pub fn new(
        base_url: &str,
        repos: Repositories,
        username: &str,
        app_password: Token,
    ) -> Result<Self> {
        let auth = Auth::Basic {
            username: username.to_string(),
            password: app_password,
        };
        Ok(Self {
            api: ApiClient::new(base_url, auth)?,
            repos,
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.api = self.api.with_retry(retry);
        self
    }

    fn repo_path(&self, repository: &str) -> String {
        format!("repositories/{}/{repository}", self.repos.owner)
    }
}

#[async_trait]
impl Git for BitbucketGit {
    fn git_type(&self) -> GitType {
        GitType::Bitbucket
    }

    fn repositories(&self) -> &Repositories {
        &self.repos
    }

    async fn get_commit_sha(&self, repository: &str, branch: &str) -> Result<String> {
        let branch: Branch = self
            .api
            .get_json(
                &format!("{}/refs/branches/{branch}", self.repo_path(repository)),
                &[],
            )
            .await?;
        Ok(branch.target.hash)
    }

    async fn read_file(&self, repository: &str, branch: &str, path: &str) -> Result<String> {
        self.api
            .get_text(
                &format!("{}/src/{branch}/{path}", self.repo_path(repository)),
                &[],
            )
            .await
    }

    /// Uploads the file through the `src` endpoint.
    ///
    /// The endpoint answers without a body, so the new head of `branch` is
    /// read back afterwards.
    async fn commit_file(
        &self,
        repository: &str,
        branch: &str,
        base: &str,
        change: &FileChange,
        message: &str,
    ) -> Result<String> {
        let mut form = vec![
            (change.path.clone(), change.content.clone()),
            ("message".to_string(), message.to_string()),
            ("branch".to_string(), branch.to_string()),
        ];
        if branch != base {
            let parent = self.get_commit_sha(repository, base).await?;
            form.push(("parents".to_string(), parent));
        }

        self.api
            .execute(
                Method::POST,
                &format!("{}/src", self.repo_path(repository)),
                |r| r.form(&form),
            )
            .await?;

        self.get_commit_sha(repository, branch).await
    }

    async fn open_pull_request(
        &self,
        repository: &str,
        head: &str,
        base: &str,
        title: &str,
    ) -> Result<PullRequest> {
        let response: PullRequestResponse = self
            .api
            .send_json(
                Method::POST,
                &format!("{}/pullrequests", self.repo_path(repository)),
                &json!({
                    "title": title,
                    "source": { "branch": { "name": head } },
                    "destination": { "branch": { "name": base } },
                    "close_source_branch": true,
                }),
            )
            .await?;

        // The pull request payload only carries an abbreviated hash
        let sha = self.get_commit_sha(repository, head).await?;

        let url = response.links.and_then(|l| l.html).map(|h| h.href);
        Ok(PullRequest::new(response.id, sha, repository).with_url(url))
    }

    async fn merge_pull_request(&self, pull_request: &PullRequest) -> Result<PullRequest> {
        let response: MergeResponse = self
            .api
            .send_json(
                Method::POST,
                &format!(
                    "{}/pullrequests/{}/merge",
                    self.repo_path(&pull_request.repository),
                    pull_request.number
                ),
                &json!({ "merge_strategy": "merge_commit" }),
            )
            .await?;

        let merge_sha = response
            .merge_commit
            .map(|c| c.hash)
            .ok_or_else(|| HarnessError::Api {
                status: 200,
                message: format!("pull request #{} reported no merge commit", pull_request.number),
                code: None,
            })?;

        Ok(pull_request.to_merged(merge_sha, Utc::now()))
    }
}
