use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{Auth, Token};
use crate::error::Result;
use crate::http::ApiClient;
use crate::model::{EventType, Pipeline, PipelineStatus, PullRequest};
use crate::providers::git::Repositories;
use crate::retry::RetryOptions;

use super::discovery::{map_native_status, select_pipeline, RunCandidate, StatusTable};
use super::{Ci, CiType};

const SHA_LABEL: &str = "pipelinesascode.tekton.dev/sha";
const REPOSITORY_LABEL: &str = "pipelinesascode.tekton.dev/url-repository";
const EVENT_LABEL: &str = "pipelinesascode.tekton.dev/event-type";
const BRANCH_LABEL: &str = "pipelinesascode.tekton.dev/branch";
const PIPELINE_RUN_LABEL: &str = "tekton.dev/pipelineRun";

/// Reasons of the `Succeeded` condition, lowercased.
const STATUS_TABLE: StatusTable = &[
    ("succeeded", "success"),
    ("completed", "success"),
    ("started", "running"),
    ("resolvingpipelineref", "pending"),
    ("pipelinerunpending", "pending"),
    ("pipelineruntimeout", "failed"),
    ("couldntgetpipeline", "failed"),
    ("cancelled", "canceled"),
    ("cancelledrunfinally", "canceled"),
    ("stoppedrunfinally", "canceled"),
];

/// Tekton PipelineRuns created by Pipelines-as-Code.
///
/// Push and pull request runs of one commit share its SHA label, so every
/// lookup must name the event type.
pub struct TektonCi {
    api: ApiClient,
    repos: Repositories,
    namespace: String,
}

#[derive(Deserialize)]
struct List<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct PipelineRun {
    metadata: Metadata,
    #[serde(default)]
    status: RunStatus,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RunStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
    start_time: Option<DateTime<Utc>>,
    completion_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    reason: Option<String>,
    last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TaskRun {
    status: Option<TaskRunStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRunStatus {
    pod_name: Option<String>,
}

#[derive(Deserialize)]
struct Pod {
    spec: PodSpec,
}

#[derive(Deserialize)]
struct PodSpec {
    containers: Vec<Container>,
}

#[derive(Deserialize)]
struct Container {
    name: String,
}

impl PipelineRun {
    fn succeeded(&self) -> Option<&Condition> {
        self.status.conditions.iter().find(|c| c.kind == "Succeeded")
    }

    /// A run without a `Succeeded` condition has not been picked up yet.
    /// A `False` condition is final whatever its reason.
    fn native_status(&self) -> String {
        match self.succeeded() {
            None => "pending".to_string(),
            Some(c) if c.status == "True" => "succeeded".to_string(),
            Some(c) if c.status == "False" => {
                let reason = c.reason.as_deref().map(str::to_ascii_lowercase);
                let cancelled = reason.as_deref().is_some_and(|r| {
                    STATUS_TABLE
                        .iter()
                        .any(|(native, canonical)| *native == r && *canonical == "canceled")
                });
                if cancelled { "canceled" } else { "failed" }.to_string()
            }
            Some(c) => match c.reason.as_deref() {
                Some(reason) => reason.to_ascii_lowercase(),
                None => "running".to_string(),
            },
        }
    }

    fn event_type(&self) -> Option<EventType> {
        let event = self.metadata.labels.get(EVENT_LABEL)?.to_ascii_lowercase();
        Some(if event.contains("pull_request") || event.contains("merge_request") {
            EventType::PullRequest
        } else if event.contains("push") {
            EventType::Push
        } else {
            EventType::Build
        })
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.status
            .completion_time
            .or_else(|| self.succeeded().and_then(|c| c.last_transition_time))
            .or(self.status.start_time)
            .or(self.metadata.creation_timestamp)
            .unwrap_or_default()
    }

    fn into_candidate(self, repository: &str) -> RunCandidate {
        let updated_at = self.updated_at();
        let status = map_native_status(STATUS_TABLE, &self.native_status());
        let event_type = self.event_type();
        let sha = self
            .metadata
            .labels
            .get(SHA_LABEL)
            .cloned()
            .unwrap_or_default();

        let mut pipeline =
            Pipeline::new(self.metadata.name.clone(), repository, sha).with_status(status);
        pipeline.name = Some(self.metadata.name.clone());
        pipeline.branch = self.metadata.labels.get(BRANCH_LABEL).cloned();
        pipeline.event_type = event_type;
        RunCandidate {
            pipeline,
            updated_at,
        }
    }
}

impl TektonCi {
    /// # Arguments
    ///
    /// * `api_server` - Kubernetes API server URL
    /// * `repos` - Source and GitOps repositories watched by Pipelines-as-Code
    /// * `namespace` - Namespace the PipelineRuns are created in
    /// * `token` - Service account token allowed to read and patch PipelineRuns
    pub fn new(
        api_server: &str,
        repos: Repositories,
        namespace: &str,
        token: Option<Token>,
    ) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(api_server, Auth::bearer(token))?,
            repos,
            namespace: namespace.to_string(),
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.api = self.api.with_retry(retry);
        self
    }

    fn runs_path(&self) -> String {
        format!(
            "apis/tekton.dev/v1/namespaces/{}/pipelineruns",
            self.namespace
        )
    }

    async fn fetch_runs(&self, selector: String) -> Result<Vec<PipelineRun>> {
        let list: List<PipelineRun> = self
            .api
            .get_json(&self.runs_path(), &[("labelSelector", selector)])
            .await?;
        Ok(list.items)
    }

    async fn container_logs(&self, pod: &str) -> Result<String> {
        let pods_path = format!("api/v1/namespaces/{}/pods/{pod}", self.namespace);
        let pod_spec: Pod = self.api.get_json(&pods_path, &[]).await?;

        let mut logs = String::new();
        for container in pod_spec.spec.containers {
            match self
                .api
                .get_text(
                    &format!("{pods_path}/log"),
                    &[("container", container.name.clone())],
                )
                .await
            {
                Ok(text) => logs.push_str(&format!("=== {pod}/{} ===\n{text}\n", container.name)),
                Err(e) => warn!("Failed to read logs of {pod}/{}: {e}", container.name),
            }
        }
        Ok(logs)
    }
}

#[async_trait]
impl Ci for TektonCi {
    fn ci_type(&self) -> CiType {
        CiType::Tekton
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
        let selector = format!(
            "{SHA_LABEL}={},{REPOSITORY_LABEL}={}",
            reference.sha, reference.repository
        );
        let candidates = self
            .fetch_runs(selector)
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
        let run: PipelineRun = self
            .api
            .get_json(&format!("{}/{}", self.runs_path(), pipeline.id), &[])
            .await?;
        Ok(map_native_status(STATUS_TABLE, &run.native_status()))
    }

    /// Collects the container logs of every TaskRun pod of the run.
    async fn get_pipeline_logs(&self, pipeline: &Pipeline) -> Result<String> {
        let task_runs: List<TaskRun> = self
            .api
            .get_json(
                &format!(
                    "apis/tekton.dev/v1/namespaces/{}/taskruns",
                    self.namespace
                ),
                &[("labelSelector", format!("{PIPELINE_RUN_LABEL}={}", pipeline.id))],
            )
            .await?;

        let mut logs = String::new();
        for pod in task_runs
            .items
            .into_iter()
            .filter_map(|t| t.status.and_then(|s| s.pod_name))
        {
            logs.push_str(&self.container_logs(&pod).await?);
        }
        Ok(logs)
    }

    async fn list_pipelines(&self, repository: &str) -> Result<Vec<Pipeline>> {
        Ok(self
            .fetch_runs(format!("{REPOSITORY_LABEL}={repository}"))
            .await?
            .into_iter()
            .map(|run| run.into_candidate(repository).pipeline)
            .collect())
    }

    async fn cancel_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let patch = json!({ "spec": { "status": "Cancelled" } }).to_string();
        self.api
            .execute(
                Method::PATCH,
                &format!("{}/{}", self.runs_path(), pipeline.id),
                |r| {
                    r.header(CONTENT_TYPE, "application/merge-patch+json")
                        .body(patch.clone())
                },
            )
            .await?;
        Ok(())
    }
}
