use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{Auth, Token};
use crate::error::{HarnessError, Result};
use crate::http::ApiClient;
use crate::model::{same_revision, EventType, Pipeline, PipelineStatus, PullRequest};
use crate::providers::git::Repositories;
use crate::retry::RetryOptions;

use super::discovery::{map_native_status, select_pipeline, RunCandidate, StatusTable};
use super::{Ci, CiType};

const API_VERSION: &str = "7.1";
const BUILDS_PER_DEFINITION: &str = "50";

/// Build statuses, and results of completed builds.
const STATUS_TABLE: StatusTable = &[
    ("notstarted", "queued"),
    ("postponed", "pending"),
    ("inprogress", "running"),
    ("cancelling", "running"),
    ("succeeded", "success"),
    ("partiallysucceeded", "failed"),
    ("canceled", "canceled"),
];

/// Azure Pipelines builds, one pipeline definition per repository.
pub struct AzurePipelinesCi {
    api: ApiClient,
    repos: Repositories,
}

#[derive(Deserialize)]
struct ValueList<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
struct Definition {
    id: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Build {
    id: u64,
    build_number: Option<String>,
    status: String,
    result: Option<String>,
    source_version: Option<String>,
    source_branch: Option<String>,
    reason: Option<String>,
    queue_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    trigger_info: HashMap<String, String>,
    #[serde(rename = "_links")]
    links: Option<BuildLinks>,
}

#[derive(Deserialize)]
struct BuildLinks {
    web: Option<Href>,
}

#[derive(Deserialize)]
struct Href {
    href: String,
}

#[derive(Deserialize)]
struct BuildLog {
    id: u64,
}

impl Build {
    fn native_status(&self) -> &str {
        match (self.status.as_str(), self.result.as_deref()) {
            ("completed", Some(result)) => result,
            (status, _) => status,
        }
    }

    /// PR builds run on a merge commit; the PR head is in the trigger info.
    fn revisions(&self) -> impl Iterator<Item = &str> {
        self.source_version
            .as_deref()
            .into_iter()
            .chain(self.trigger_info.get("pr.sourceSha").map(String::as_str))
    }

    fn event_type(&self) -> EventType {
        match self.reason.as_deref() {
            Some("pullRequest") => EventType::PullRequest,
            Some("individualCI" | "batchedCI") => EventType::Push,
            _ => EventType::Build,
        }
    }

    fn into_candidate(self, repository: &str) -> RunCandidate {
        let updated_at = self
            .finish_time
            .or(self.start_time)
            .or(self.queue_time)
            .unwrap_or_default();
        let sha = self
            .trigger_info
            .get("pr.sourceSha")
            .or(self.source_version.as_ref())
            .cloned()
            .unwrap_or_default();

        let mut pipeline = Pipeline::new(self.id.to_string(), repository, sha)
            .with_status(map_native_status(STATUS_TABLE, self.native_status()));
        pipeline.event_type = Some(self.event_type());
        pipeline.name = self.build_number;
        pipeline.branch = self
            .source_branch
            .map(|b| b.trim_start_matches("refs/heads/").to_string());
        pipeline.web_url = self.links.and_then(|l| l.web).map(|w| w.href);
        RunCandidate {
            pipeline,
            updated_at,
        }
    }
}

impl AzurePipelinesCi {
    /// # Arguments
    ///
    /// * `base_url` - Organization URL (e.g., <https://dev.azure.com/acme>)
    /// * `project` - Azure DevOps project holding the pipelines
    /// * `repos` - Source and GitOps repositories; definitions share their names
    /// * `pat` - Personal access token with Build read and execute scope
    pub fn new(base_url: &str, project: &str, repos: Repositories, pat: Token) -> Result<Self> {
        let project_url = format!(
            "{}/{}/_apis/",
            base_url.trim_end_matches('/'),
            urlencoding::encode(project)
        );
        let auth = Auth::Basic {
            username: String::new(),
            password: pat,
        };
        Ok(Self {
            api: ApiClient::new(&project_url, auth)?,
            repos,
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.api = self.api.with_retry(retry);
        self
    }

    fn version() -> (&'static str, String) {
        ("api-version", API_VERSION.to_string())
    }

    async fn definition_id(&self, repository: &str) -> Result<u64> {
        let definitions: ValueList<Definition> = self
            .api
            .get_json(
                "build/definitions",
                &[("name", repository.to_string()), Self::version()],
            )
            .await?;
        definitions
            .value
            .first()
            .map(|d| d.id)
            .ok_or_else(|| HarnessError::NotFound(format!("pipeline definition '{repository}'")))
    }

    async fn fetch_builds(&self, repository: &str) -> Result<Vec<Build>> {
        let definition = self.definition_id(repository).await?;
        let builds: ValueList<Build> = self
            .api
            .get_json(
                "build/builds",
                &[
                    ("definitions", definition.to_string()),
                    ("$top", BUILDS_PER_DEFINITION.to_string()),
                    Self::version(),
                ],
            )
            .await?;
        Ok(builds.value)
    }
}

#[async_trait]
impl Ci for AzurePipelinesCi {
    fn ci_type(&self) -> CiType {
        CiType::Azure
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
            .fetch_builds(&reference.repository)
            .await?
            .into_iter()
            .filter(|build| build.revisions().any(|sha| same_revision(sha, &reference.sha)))
            .map(|build| build.into_candidate(&reference.repository))
            .collect();
        Ok(select_pipeline(
            self.ci_type(),
            candidates,
            desired_status,
            event_type,
        ))
    }

    async fn check_pipeline_status(&self, pipeline: &Pipeline) -> Result<PipelineStatus> {
        let build: Build = self
            .api
            .get_json(&format!("build/builds/{}", pipeline.id), &[Self::version()])
            .await?;
        Ok(map_native_status(STATUS_TABLE, build.native_status()))
    }

    async fn get_pipeline_logs(&self, pipeline: &Pipeline) -> Result<String> {
        let logs_path = format!("build/builds/{}/logs", pipeline.id);
        let index: ValueList<BuildLog> = self.api.get_json(&logs_path, &[Self::version()]).await?;

        let mut logs = String::new();
        for log in index.value {
            match self
                .api
                .get_text(&format!("{logs_path}/{}", log.id), &[Self::version()])
                .await
            {
                Ok(text) => logs.push_str(&format!("=== log {} ===\n{text}\n", log.id)),
                Err(e) => warn!("Failed to read log {} of build {}: {e}", log.id, pipeline.id),
            }
        }
        Ok(logs)
    }

    async fn list_pipelines(&self, repository: &str) -> Result<Vec<Pipeline>> {
        Ok(self
            .fetch_builds(repository)
            .await?
            .into_iter()
            .map(|build| build.into_candidate(repository).pipeline)
            .collect())
    }

    async fn cancel_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let body = json!({ "status": "cancelling" });
        self.api
            .execute(
                Method::PATCH,
                &format!("build/builds/{}", pipeline.id),
                |r| r.query(&[Self::version()]).json(&body),
            )
            .await?;
        Ok(())
    }
}
