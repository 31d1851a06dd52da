use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;

use crate::auth::{Auth, Token};
use crate::error::Result;
use crate::http::ApiClient;
use crate::model::{EventType, Pipeline, PipelineStatus, PullRequest};
use crate::providers::git::Repositories;
use crate::retry::RetryOptions;

use super::discovery::{map_native_status, select_pipeline, RunCandidate, StatusTable};
use super::{Ci, CiType};

/// Statuses and conclusions of workflow runs.
const STATUS_TABLE: StatusTable = &[
    ("requested", "queued"),
    ("waiting", "pending"),
    ("in_progress", "running"),
    ("action_required", "manual"),
    ("failure", "failed"),
    ("timed_out", "failed"),
    ("startup_failure", "failed"),
    ("stale", "failed"),
    ("cancelled", "canceled"),
    ("neutral", "success"),
];

const PAGE_SIZE: &str = "100";

/// GitHub Actions workflow runs.
pub struct GitHubActionsCi {
    api: ApiClient,
    repos: Repositories,
}

#[derive(Deserialize)]
struct WorkflowRunsResponse {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct WorkflowRun {
    id: u64,
    name: Option<String>,
    head_sha: String,
    head_branch: Option<String>,
    event: String,
    status: String,
    conclusion: Option<String>,
    html_url: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct JobsResponse {
    jobs: Vec<Job>,
}

#[derive(Deserialize)]
struct Job {
    id: u64,
    name: String,
}

impl WorkflowRun {
    /// Completed runs report their outcome in `conclusion`.
    fn native_status(&self) -> &str {
        match (self.status.as_str(), self.conclusion.as_deref()) {
            ("completed", Some(conclusion)) => conclusion,
            (status, _) => status,
        }
    }

    fn event_type(&self) -> EventType {
        match self.event.as_str() {
            "pull_request" | "pull_request_target" => EventType::PullRequest,
            "push" => EventType::Push,
            _ => EventType::Build,
        }
    }

    fn into_candidate(self, repository: &str) -> RunCandidate {
        let mut pipeline = Pipeline::new(self.id.to_string(), repository, self.head_sha.clone())
            .with_status(map_native_status(STATUS_TABLE, self.native_status()));
        pipeline.event_type = Some(self.event_type());
        pipeline.name = self.name;
        pipeline.branch = self.head_branch;
        pipeline.web_url = self.html_url;
        RunCandidate {
            pipeline,
            updated_at: self.updated_at,
        }
    }
}

impl GitHubActionsCi {
    /// # Arguments
    ///
    /// * `base_url` - GitHub API base URL (e.g., <https://api.github.com>)
    /// * `repos` - Source and GitOps repositories of the component
    /// * `token` - Token with `actions:write` on both repositories
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

    fn runs_path(&self, repository: &str) -> String {
        format!("repos/{}/{repository}/actions/runs", self.repos.owner)
    }

    async fn fetch_runs(&self, repository: &str, head_sha: Option<&str>) -> Result<Vec<WorkflowRun>> {
        let mut query = vec![("per_page", PAGE_SIZE.to_string())];
        if let Some(sha) = head_sha {
            query.push(("head_sha", sha.to_string()));
        }
        let response: WorkflowRunsResponse = self
            .api
            .get_json(&self.runs_path(repository), &query)
            .await?;
        Ok(response.workflow_runs)
    }
}

#[async_trait]
impl Ci for GitHubActionsCi {
    fn ci_type(&self) -> CiType {
        CiType::GithubActions
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
            .fetch_runs(&reference.repository, Some(&reference.sha))
            .await?
            .into_iter()
            .map(|run| run.into_candidate(&reference.repository))
            .collect();
        Ok(select_pipeline(
            self.ci_type(),
            candidates,
            desired_status,
            event_type,
        ))
    }

    async fn check_pipeline_status(&self, pipeline: &Pipeline) -> Result<PipelineStatus> {
        let run: WorkflowRun = self
            .api
            .get_json(
                &format!("{}/{}", self.runs_path(&pipeline.repository), pipeline.id),
                &[],
            )
            .await?;
        Ok(map_native_status(STATUS_TABLE, run.native_status()))
    }

    /// Concatenates the logs of every job of the run.
    async fn get_pipeline_logs(&self, pipeline: &Pipeline) -> Result<String> {
        let jobs: JobsResponse = self
            .api
            .get_json(
                &format!("{}/{}/jobs", self.runs_path(&pipeline.repository), pipeline.id),
                &[],
            )
            .await?;

        let mut logs = String::new();
        for job in jobs.jobs {
            let text = self
                .api
                .get_text(
                    &format!(
                        "repos/{}/{}/actions/jobs/{}/logs",
                        self.repos.owner, pipeline.repository, job.id
                    ),
                    &[],
                )
                .await?;
            logs.push_str(&format!("=== {} ===\n{text}\n", job.name));
        }
        Ok(logs)
    }

    async fn list_pipelines(&self, repository: &str) -> Result<Vec<Pipeline>> {
        Ok(self
            .fetch_runs(repository, None)
            .await?
            .into_iter()
            .map(|run| run.into_candidate(repository).pipeline)
            .collect())
    }

    async fn cancel_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        self.api
            .send_unit(
                Method::POST,
                &format!(
                    "{}/{}/cancel",
                    self.runs_path(&pipeline.repository),
                    pipeline.id
                ),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn provider(url: &str) -> GitHubActionsCi {
        GitHubActionsCi::new(
            url,
            Repositories::for_component("acme", "checkout"),
            Some(Token::from("ghp")),
        )
        .unwrap()
        .with_retry(RetryOptions::none())
    }

    const RUNS: &str = r#"{"total_count":2,"workflow_runs":[
        {"id":11,"name":"build","head_sha":"abc1234","head_branch":"main","event":"push",
         "status":"completed","conclusion":"success","html_url":"https://gh/11","updated_at":"2026-01-01T10:00:00Z"},
        {"id":12,"name":"build","head_sha":"abc1234","head_branch":"feature","event":"pull_request",
         "status":"in_progress","conclusion":null,"html_url":"https://gh/12","updated_at":"2026-01-01T10:05:00Z"}
    ]}"#;

    #[tokio::test]
    async fn discovers_run_by_head_sha_and_event() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/checkout/actions/runs")
            .match_query(Matcher::UrlEncoded("head_sha".into(), "abc1234".into()))
            .with_body(RUNS)
            .expect(2)
            .create_async()
            .await;

        let ci = provider(&server.url());
        let reference = PullRequest::commit("abc1234", "checkout");
        let push = ci
            .get_pipeline(&reference, PipelineStatus::Unknown, Some(EventType::Push))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(push.id, "11");
        assert_eq!(push.status, PipelineStatus::Success);

        let pr = ci
            .get_pipeline(&reference, PipelineStatus::Unknown, Some(EventType::PullRequest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pr.id, "12");
        assert_eq!(pr.status, PipelineStatus::Running);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cancelled_conclusion_counts_as_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/checkout/actions/runs/11")
            .with_body(
                r#"{"id":11,"name":"build","head_sha":"abc","head_branch":"main","event":"push",
                    "status":"completed","conclusion":"cancelled","html_url":null,"updated_at":"2026-01-01T10:00:00Z"}"#,
            )
            .create_async()
            .await;

        let pipeline = Pipeline::new("11", "checkout", "abc");
        let status = provider(&server.url())
            .check_pipeline_status(&pipeline)
            .await
            .unwrap();
        assert_eq!(status, PipelineStatus::Failure);
    }

    #[tokio::test]
    async fn logs_are_collected_per_job() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/checkout/actions/runs/11/jobs")
            .with_body(r#"{"jobs":[{"id":1,"name":"lint"},{"id":2,"name":"test"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/checkout/actions/jobs/1/logs")
            .with_body("lint ok")
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/checkout/actions/jobs/2/logs")
            .with_body("2 tests failed")
            .create_async()
            .await;

        let pipeline = Pipeline::new("11", "checkout", "abc");
        let logs = provider(&server.url())
            .get_pipeline_logs(&pipeline)
            .await
            .unwrap();
        assert!(logs.contains("=== lint ===\nlint ok"));
        assert!(logs.contains("=== test ===\n2 tests failed"));
    }

    #[tokio::test]
    async fn cancel_posts_to_run() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/repos/acme/checkout-gitops/actions/runs/99/cancel")
            .with_status(202)
            .create_async()
            .await;

        let pipeline = Pipeline::new("99", "checkout-gitops", "abc");
        provider(&server.url())
            .cancel_pipeline(&pipeline)
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
