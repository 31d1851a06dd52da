use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use crate::auth::{Auth, Token};
use crate::error::Result;
use crate::http::ApiClient;
use crate::model::{same_revision, EventType, Pipeline, PipelineStatus, PullRequest};
use crate::providers::git::Repositories;
use crate::retry::RetryOptions;

use super::discovery::{map_native_status, select_pipeline, RunCandidate, StatusTable};
use super::{Ci, CiType};

/// Build results; a build still running has no result yet.
const STATUS_TABLE: StatusTable = &[
    ("building", "running"),
    ("unstable", "failed"),
    ("failure", "failed"),
    ("aborted", "canceled"),
    ("not_built", "skipped"),
];

const BUILD_TREE: &str =
    "builds[number,result,building,timestamp,duration,url,actions[lastBuiltRevision[SHA1,branch[name]]]]{0,50}";

/// Jenkins jobs named after the repositories, optionally inside a folder.
///
/// Jobs are push-triggered only, so the event type of a lookup is ignored
/// and builds are matched on the revision they checked out.
pub struct JenkinsCi {
    api: ApiClient,
    repos: Repositories,
    folder: Option<String>,
}

#[derive(Deserialize)]
struct JobBuilds {
    #[serde(default)]
    builds: Vec<Build>,
}

#[derive(Deserialize)]
struct Build {
    number: u64,
    result: Option<String>,
    #[serde(default)]
    building: bool,
    /// Start time in epoch milliseconds
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    duration: i64,
    url: Option<String>,
    #[serde(default)]
    actions: Vec<Value>,
}

impl Build {
    fn native_status(&self) -> &str {
        if self.building {
            return "building";
        }
        self.result.as_deref().unwrap_or("queued")
    }

    fn revision(&self) -> Option<&str> {
        self.actions
            .iter()
            .find_map(|action| action.pointer("/lastBuiltRevision/SHA1")?.as_str())
    }

    fn branch(&self) -> Option<String> {
        self.actions.iter().find_map(|action| {
            let name = action
                .pointer("/lastBuiltRevision/branch/0/name")?
                .as_str()?;
            Some(name.trim_start_matches("refs/remotes/origin/").to_string())
        })
    }

    fn updated_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp + self.duration.max(0))
            .single()
            .unwrap_or_default()
    }

    fn into_candidate(self, repository: &str) -> RunCandidate {
        let updated_at = self.updated_at();
        let mut pipeline = Pipeline::new(
            self.number.to_string(),
            repository,
            self.revision().unwrap_or_default(),
        )
        .with_status(map_native_status(STATUS_TABLE, self.native_status()));
        pipeline.name = Some(repository.to_string());
        pipeline.branch = self.branch();
        pipeline.event_type = Some(EventType::Push);
        pipeline.web_url = self.url;
        RunCandidate {
            pipeline,
            updated_at,
        }
    }
}

impl JenkinsCi {
    /// # Arguments
    ///
    /// * `base_url` - Jenkins root URL
    /// * `repos` - Source and GitOps repositories; one job per repository
    /// * `folder` - Folder holding the jobs, if any
    /// * `username` - User the API token belongs to
    /// * `api_token` - Jenkins API token
    pub fn new(
        base_url: &str,
        repos: Repositories,
        folder: Option<String>,
        username: &str,
        api_token: Token,
    ) -> Result<Self> {
        let auth = Auth::Basic {
            username: username.to_string(),
            password: api_token,
        };
        Ok(Self {
            api: ApiClient::new(base_url, auth)?,
            repos,
            folder,
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.api = self.api.with_retry(retry);
        self
    }

    fn job_path(&self, repository: &str) -> String {
        match &self.folder {
            Some(folder) => format!("job/{folder}/job/{repository}"),
            None => format!("job/{repository}"),
        }
    }

    async fn fetch_builds(&self, repository: &str) -> Result<Vec<Build>> {
        let job: JobBuilds = self
            .api
            .get_json(
                &format!("{}/api/json", self.job_path(repository)),
                &[("tree", BUILD_TREE.to_string())],
            )
            .await?;
        Ok(job.builds)
    }
}

#[async_trait]
impl Ci for JenkinsCi {
    fn ci_type(&self) -> CiType {
        CiType::Jenkins
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
            .filter(|build| build.revision().is_some_and(|sha| same_revision(sha, &reference.sha)))
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
            .get_json(
                &format!(
                    "{}/{}/api/json",
                    self.job_path(&pipeline.repository),
                    pipeline.id
                ),
                &[("tree", "number,result,building,timestamp,duration,url".to_string())],
            )
            .await?;
        Ok(map_native_status(STATUS_TABLE, build.native_status()))
    }

    async fn get_pipeline_logs(&self, pipeline: &Pipeline) -> Result<String> {
        self.api
            .get_text(
                &format!(
                    "{}/{}/consoleText",
                    self.job_path(&pipeline.repository),
                    pipeline.id
                ),
                &[],
            )
            .await
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
        self.api
            .send_unit(
                Method::POST,
                &format!("{}/{}/stop", self.job_path(&pipeline.repository), pipeline.id),
            )
            .await
    }
}
