mod bitbucket;
mod github;
mod gitlab;
pub mod gitops;

use std::fmt;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::model::{Environment, PullRequest};

pub use bitbucket::BitbucketGit;
pub use github::GitHubGit;
pub use gitlab::GitLabGit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitType {
    Github,
    Gitlab,
    Bitbucket,
}

impl fmt::Display for GitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Github => "GitHub",
            Self::Gitlab => "GitLab",
            Self::Bitbucket => "Bitbucket",
        })
    }
}

/// The two repositories a scaffolded component owns.
#[derive(Debug, Clone)]
pub struct Repositories {
    /// Organisation, group or workspace holding both repositories
    pub owner: String,
    pub component: String,
    pub source: String,
    pub gitops: String,
    pub default_branch: String,
}

impl Repositories {
    /// Conventional layout: `<component>` and `<component>-gitops`.
    pub fn for_component(owner: &str, component: &str) -> Self {
        Self {
            owner: owner.to_string(),
            component: component.to_string(),
            source: component.to_string(),
            gitops: format!("{component}-gitops"),
            default_branch: "main".to_string(),
        }
    }
}

/// A single-file change to commit.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: String,
    pub content: String,
    /// The file does not exist on the base branch yet
    pub create: bool,
}

/// Source-control operations the workflows need from a Git provider.
///
/// Providers implement the primitives; the workflow-level operations are
/// built on top of them and shared by every provider.
#[async_trait]
pub trait Git: Send + Sync {
    fn git_type(&self) -> GitType;

    fn repositories(&self) -> &Repositories;

    /// Full SHA of the head commit of `branch`.
    async fn get_commit_sha(&self, repository: &str, branch: &str) -> Result<String>;

    async fn read_file(&self, repository: &str, branch: &str, path: &str) -> Result<String>;

    /// Commits `change` to `branch` and returns the new commit SHA.
    ///
    /// When `branch` differs from `base` it is created from the head of `base`.
    async fn commit_file(
        &self,
        repository: &str,
        branch: &str,
        base: &str,
        change: &FileChange,
        message: &str,
    ) -> Result<String>;

    async fn open_pull_request(
        &self,
        repository: &str,
        head: &str,
        base: &str,
        title: &str,
    ) -> Result<PullRequest>;

    /// Merges `pull_request` and returns a new value pointing at the merge commit.
    async fn merge_pull_request(&self, pull_request: &PullRequest) -> Result<PullRequest>;

    async fn get_source_repo_commit_sha(&self, branch: &str) -> Result<String> {
        self.get_commit_sha(&self.repositories().source, branch).await
    }

    async fn get_gitops_repo_commit_sha(&self, branch: &str) -> Result<String> {
        self.get_commit_sha(&self.repositories().gitops, branch).await
    }

    async fn create_sample_commit_on_source_repo(&self) -> Result<PullRequest> {
        let repos = self.repositories();
        let change = sample_change();
        let sha = self
            .commit_file(
                &repos.source,
                &repos.default_branch,
                &repos.default_branch,
                &change,
                "test: sample change",
            )
            .await?;

        info!("Created sample commit {sha} on {}", repos.source);
        Ok(PullRequest::commit(sha, &repos.source))
    }

    async fn create_sample_pull_request_on_source_repo(&self) -> Result<PullRequest> {
        let repos = self.repositories();
        let branch = format!("sample-change-{}", gitops::unique_suffix());

        self.commit_file(
            &repos.source,
            &branch,
            &repos.default_branch,
            &sample_change(),
            "test: sample change",
        )
        .await?;

        let pull_request = self
            .open_pull_request(
                &repos.source,
                &branch,
                &repos.default_branch,
                &format!("Sample change for {}", repos.component),
            )
            .await?;

        info!("Opened {}", pull_request.describe());
        Ok(pull_request)
    }

    async fn create_promotion_pull_request_on_gitops_repo(
        &self,
        environment: Environment,
        image: &str,
    ) -> Result<PullRequest> {
        let repos = self.repositories();
        let change = self.promotion_change(environment, image).await?;
        let branch = format!("promote-{environment}-{}", gitops::unique_suffix());

        self.commit_file(
            &repos.gitops,
            &branch,
            &repos.default_branch,
            &change,
            &format!("Promote {} to {environment}", repos.component),
        )
        .await?;

        let pull_request = self
            .open_pull_request(
                &repos.gitops,
                &branch,
                &repos.default_branch,
                &format!("Promote {} to {environment}", repos.component),
            )
            .await?;

        info!("Opened promotion {}", pull_request.describe());
        Ok(pull_request)
    }

    async fn create_promotion_commit_on_gitops_repo(
        &self,
        environment: Environment,
        image: &str,
    ) -> Result<String> {
        let repos = self.repositories();
        let change = self.promotion_change(environment, image).await?;

        let sha = self
            .commit_file(
                &repos.gitops,
                &repos.default_branch,
                &repos.default_branch,
                &change,
                &format!("Promote {} to {environment}", repos.component),
            )
            .await?;

        info!("Committed promotion to {environment} as {sha}");
        Ok(sha)
    }

    /// Image currently declared for `environment` in the GitOps repository.
    async fn extract_application_image(&self, environment: Environment) -> Result<String> {
        let repos = self.repositories();
        let path = gitops::deployment_patch_path(&repos.component, environment);
        let content = self
            .read_file(&repos.gitops, &repos.default_branch, &path)
            .await?;

        gitops::extract_image(&content)
            .ok_or_else(|| HarnessError::NotFound(format!("image reference in {path}")))
    }

    /// The manifest change that points `environment` at `image`.
    async fn promotion_change(&self, environment: Environment, image: &str) -> Result<FileChange> {
        let repos = self.repositories();
        let path = gitops::deployment_patch_path(&repos.component, environment);
        let content = self
            .read_file(&repos.gitops, &repos.default_branch, &path)
            .await?;

        if gitops::extract_image(&content).as_deref() == Some(image) {
            return Err(HarnessError::Precondition(format!(
                "{environment} already deploys {image}"
            )));
        }

        Ok(FileChange {
            content: gitops::replace_image(&content, image)?,
            path,
            create: false,
        })
    }
}

fn sample_change() -> FileChange {
    let suffix = gitops::unique_suffix();
    FileChange {
        path: format!("e2e/change-{suffix}.txt"),
        content: format!("Sample change {suffix}\n"),
        create: true,
    }
}
