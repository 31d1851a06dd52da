use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;

use crate::auth::{Auth, Token};
use crate::error::{HarnessError, Result};
use crate::http::ApiClient;
use crate::model::{EventType, Pipeline, PipelineStatus, PullRequest};
use crate::providers::git::Repositories;
use crate::retry::RetryOptions;

use super::discovery::{map_native_status, select_pipeline, RunCandidate, StatusTable};
use super::{Ci, CiType};

const STATUS_TABLE: StatusTable = &[
    ("waiting_for_resource", "pending"),
    ("preparing", "pending"),
    ("canceling", "running"),
];

const PAGE_SIZE: &str = "100";

/// GitLab CI pipelines through the v4 REST API.
pub struct GitLabCi {
    api: ApiClient,
    repos: Repositories,
}

#[derive(Deserialize)]
struct GitLabPipeline {
    id: u64,
    sha: String,
    #[serde(rename = "ref")]
    ref_: Option<String>,
    status: String,
    source: Option<String>,
    web_url: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct GitLabJob {
    id: u64,
    name: String,
}

impl GitLabPipeline {
    fn event_type(&self) -> EventType {
        match self.source.as_deref() {
            Some("merge_request_event" | "external_pull_request_event") => EventType::PullRequest,
            Some("push") => EventType::Push,
            _ => EventType::Build,
        }
    }

    fn into_candidate(self, repository: &str) -> RunCandidate {
        let event_type = self.event_type();
        let mut pipeline = Pipeline::new(self.id.to_string(), repository, self.sha)
            .with_status(map_native_status(STATUS_TABLE, &self.status));
        pipeline.event_type = Some(event_type);
        pipeline.branch = self.ref_;
        pipeline.web_url = self.web_url;
        RunCandidate {
            pipeline,
            updated_at: self.updated_at,
        }
    }
}

impl GitLabCi {
    /// # Arguments
    ///
    /// * `base_url` - GitLab instance base URL (e.g., <https://gitlab.com>)
    /// * `repos` - Source and GitOps projects; `owner` is the group path
    /// * `token` - Token with `api` scope
    pub fn new(base_url: &str, repos: Repositories, token: Option<Token>) -> Result<Self> {
        let api_url = url::Url::parse(base_url)
            .and_then(|url| url.join("api/v4/"))
            .map_err(|e| HarnessError::Config(format!("Invalid GitLab URL '{base_url}': {e}")))?;
        Ok(Self {
            api: ApiClient::new(api_url.as_str(), Auth::bearer(token))?,
            repos,
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.api = self.api.with_retry(retry);
        self
    }

    fn project_path(&self, repository: &str) -> String {
        let full_path = format!("{}/{repository}", self.repos.owner);
        format!("projects/{}", urlencoding::encode(&full_path))
    }

    async fn fetch_pipelines(&self, repository: &str, sha: Option<&str>) -> Result<Vec<GitLabPipeline>> {
        let mut query = vec![("per_page", PAGE_SIZE.to_string())];
        if let Some(sha) = sha {
            query.push(("sha", sha.to_string()));
        }
        self.api
            .get_json(
                &format!("{}/pipelines", self.project_path(repository)),
                &query,
            )
            .await
    }
}

#[async_trait]
impl Ci for GitLabCi {
    fn ci_type(&self) -> CiType {
        CiType::GitlabCi
    }

    fn repositories(&self) -> Vec<String> {
        vec![self.repos.source.clone(), self.repos.gitops.clone()]
    }

    async fn get_pipeline(
        &self,
        reference: &PullRequest,
        desired_status: PipelineStatus,
        event_type: Option<EventType>,
    ) -> Result<Option<Pipeline>> {
        let candidates = self
            .fetch_pipelines(&reference.repository, Some(&reference.sha))
            .await?
            .into_iter()
            .map(|p| p.into_candidate(&reference.repository))
            .collect();
        Ok(select_pipeline(
            self.ci_type(),
            candidates,
            desired_status,
            event_type,
        ))
    }

    async fn check_pipeline_status(&self, pipeline: &Pipeline) -> Result<PipelineStatus> {
        let current: GitLabPipeline = self
            .api
            .get_json(
                &format!(
                    "{}/pipelines/{}",
                    self.project_path(&pipeline.repository),
                    pipeline.id
                ),
                &[],
            )
            .await?;
        Ok(map_native_status(STATUS_TABLE, &current.status))
    }

    /// Concatenates the trace of every job of the pipeline.
    async fn get_pipeline_logs(&self, pipeline: &Pipeline) -> Result<String> {
        let project = self.project_path(&pipeline.repository);
        let jobs: Vec<GitLabJob> = self
            .api
            .get_json(
                &format!("{project}/pipelines/{}/jobs", pipeline.id),
                &[("per_page", PAGE_SIZE.to_string())],
            )
            .await?;

        let mut logs = String::new();
        for job in jobs {
            let trace = self
                .api
                .get_text(&format!("{project}/jobs/{}/trace", job.id), &[])
                .await?;
            logs.push_str(&format!("=== {} ===\n{trace}\n", job.name));
        }
        Ok(logs)
    }

    async fn list_pipelines(&self, repository: &str) -> Result<Vec<Pipeline>> {
        Ok(self
            .fetch_pipelines(repository, None)
            .await?
            .into_iter()
            .map(|p| p.into_candidate(repository).pipeline)
            .collect())
    }

    async fn cancel_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        self.api
            .send_unit(
                Method::POST,
                &format!(
                    "{}/pipelines/{}/cancel",
                    self.project_path(&pipeline.repository),
                    pipeline.id
                ),
            )
            .await
    }
}
