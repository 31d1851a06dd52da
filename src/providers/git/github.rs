use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{Auth, Token};
use crate::error::Result;
use crate::http::ApiClient;
use crate::model::PullRequest;
use crate::retry::RetryOptions;

use super::{FileChange, Git, GitType, Repositories};

/// GitHub binding built on the REST git data API.
///
/// Commits are assembled from a tree with inline content, so file contents
/// never need base64 encoding.
pub struct GitHubGit {
    api: ApiClient,
    repos: Repositories,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct GitCommit {
    tree: CommitRef,
}

#[derive(Deserialize)]
struct PullResponse {
    number: u64,
    html_url: Option<String>,
    head: CommitRef,
}

#[derive(Deserialize)]
struct MergeResponse {
    sha: String,
}

impl GitHubGit {
    /// # Arguments
    ///
    /// * `base_url` - GitHub API base URL (e.g., <https://api.github.com>)
    /// * `repos` - Source and GitOps repositories of the component
    /// * `token` - Personal access token or app installation token
    pub fn new(base_url: &str, repos: Repositories, token: Option<Token>) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(base_url, Auth::bearer(token))?,
            repos,
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.api = self.api.with_retry(retry);
        self
    }

    fn repo_path(&self, repository: &str) -> String {
        format!("repos/{}/{repository}", self.repos.owner)
    }
}

#[async_trait]
impl Git for GitHubGit {
    fn git_type(&self) -> GitType {
        GitType::Github
    }

    fn repositories(&self) -> &Repositories {
        &self.repos
    }

    async fn get_commit_sha(&self, repository: &str, branch: &str) -> Result<String> {
        let commit: CommitRef = self
            .api
            .get_json(
                &format!("{}/commits/{branch}", self.repo_path(repository)),
                &[],
            )
            .await?;
        Ok(commit.sha)
    }

    async fn read_file(&self, repository: &str, branch: &str, path: &str) -> Result<String> {
        self.api
            .get_text_as(
                &format!("{}/contents/{path}?ref={branch}", self.repo_path(repository)),
                "application/vnd.github.raw+json",
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
        let repo = self.repo_path(repository);
        let parent = self.get_commit_sha(repository, base).await?;

        let parent_commit: GitCommit = self
            .api
            .get_json(&format!("{repo}/git/commits/{parent}"), &[])
            .await?;

        let tree: CommitRef = self
            .api
            .send_json(
                Method::POST,
                &format!("{repo}/git/trees"),
                &json!({
                    "base_tree": parent_commit.tree.sha,
                    "tree": [{
                        "path": change.path,
                        "mode": "100644",
                        "type": "blob",
                        "content": change.content,
                    }],
                }),
            )
            .await?;

        let commit: CommitRef = self
            .api
            .send_json(
                Method::POST,
                &format!("{repo}/git/commits"),
                &json!({
                    "message": message,
                    "tree": tree.sha,
                    "parents": [parent],
                }),
            )
            .await?;

        if branch == base {
            let _: serde_json::Value = self
                .api
                .send_json(
                    Method::PATCH,
                    &format!("{repo}/git/refs/heads/{branch}"),
                    &json!({ "sha": commit.sha }),
                )
                .await?;
        } else {
            let _: serde_json::Value = self
                .api
                .send_json(
                    Method::POST,
                    &format!("{repo}/git/refs"),
                    &json!({ "ref": format!("refs/heads/{branch}"), "sha": commit.sha }),
                )
                .await?;
        }

        Ok(commit.sha)
    }

    async fn open_pull_request(
        &self,
        repository: &str,
        head: &str,
        base: &str,
        title: &str,
    ) -> Result<PullRequest> {
        let pull: PullResponse = self
            .api
            .send_json(
                Method::POST,
                &format!("{}/pulls", self.repo_path(repository)),
                &json!({ "title": title, "head": head, "base": base }),
            )
            .await?;

        Ok(PullRequest::new(pull.number, pull.head.sha, repository).with_url(pull.html_url))
    }

    async fn merge_pull_request(&self, pull_request: &PullRequest) -> Result<PullRequest> {
        let merge: MergeResponse = self
            .api
            .send_json(
                Method::PUT,
                &format!(
                    "{}/pulls/{}/merge",
                    self.repo_path(&pull_request.repository),
                    pull_request.number
                ),
                &json!({ "merge_method": "merge" }),
            )
            .await?;

        Ok(pull_request.to_merged(merge.sha, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Environment;
    use mockito::Matcher;

    fn provider(url: &str) -> GitHubGit {
        GitHubGit::new(
            url,
            Repositories::for_component("acme", "checkout"),
            Some(Token::from("ghp_test")),
        )
        .unwrap()
        .with_retry(RetryOptions::none())
    }

    #[tokio::test]
    async fn extracts_image_from_raw_contents() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/repos/acme/checkout-gitops/contents/components/checkout/overlays/stage/deployment-patch.yaml",
            )
            .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
            .match_header("accept", "application/vnd.github.raw+json")
            .with_body("spec:\n  containers:\n    - image: quay.io/acme/checkout:abc\n")
            .create_async()
            .await;

        let image = provider(&server.url())
            .extract_application_image(Environment::Stage)
            .await
            .unwrap();

        assert_eq!(image, "quay.io/acme/checkout:abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn commit_on_default_branch_moves_the_ref() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/checkout/commits/main")
            .with_body(r#"{"sha":"parent111"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/checkout/git/commits/parent111")
            .with_body(r#"{"sha":"parent111","tree":{"sha":"tree000"}}"#)
            .create_async()
            .await;
        let tree = server
            .mock("POST", "/repos/acme/checkout/git/trees")
            .match_body(Matcher::PartialJson(json!({"base_tree": "tree000"})))
            .with_status(201)
            .with_body(r#"{"sha":"tree111"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/repos/acme/checkout/git/commits")
            .match_body(Matcher::PartialJson(
                json!({"tree": "tree111", "parents": ["parent111"]}),
            ))
            .with_status(201)
            .with_body(r#"{"sha":"commit222"}"#)
            .create_async()
            .await;
        let update_ref = server
            .mock("PATCH", "/repos/acme/checkout/git/refs/heads/main")
            .match_body(Matcher::PartialJson(json!({"sha": "commit222"})))
            .with_body(r#"{"ref":"refs/heads/main"}"#)
            .create_async()
            .await;

        let reference = provider(&server.url())
            .create_sample_commit_on_source_repo()
            .await
            .unwrap();

        assert!(reference.is_commit());
        assert_eq!(reference.sha, "commit222");
        tree.assert_async().await;
        update_ref.assert_async().await;
    }

    #[tokio::test]
    async fn merge_returns_merged_copy() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/repos/acme/checkout-gitops/pulls/7/merge")
            .with_body(r#"{"sha":"merge999","merged":true,"message":"Pull Request successfully merged"}"#)
            .create_async()
            .await;

        let pr = PullRequest::new(7, "head123", "checkout-gitops");
        let merged = provider(&server.url()).merge_pull_request(&pr).await.unwrap();

        assert!(merged.merged);
        assert_eq!(merged.sha, "merge999");
        assert_eq!(merged.number, 7);
        assert!(!pr.merged);
    }

    #[tokio::test]
    async fn unmergeable_pull_request_is_an_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/repos/acme/checkout-gitops/pulls/8/merge")
            .with_status(405)
            .with_body(r#"{"message":"Pull Request is not mergeable"}"#)
            .create_async()
            .await;

        let pr = PullRequest::new(8, "head123", "checkout-gitops");
        let err = provider(&server.url())
            .merge_pull_request(&pr)
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(405));
        assert!(err.to_string().contains("not mergeable"));
    }
}
