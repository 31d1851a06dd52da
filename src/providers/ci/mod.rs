mod azure;
pub mod cancellation;
pub mod discovery;
mod github_actions;
mod gitlab_ci;
mod jenkins;
mod tekton;
pub mod waiting;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    CancelPipelineOptions, CancelResult, EventType, Pipeline, PipelineStatus, PollSettings,
    PullRequest,
};

pub use azure::AzurePipelinesCi;
pub use github_actions::GitHubActionsCi;
pub use gitlab_ci::GitLabCi;
pub use jenkins::JenkinsCi;
pub use tekton::TektonCi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CiType {
    GithubActions,
    GitlabCi,
    Jenkins,
    Tekton,
    Azure,
}

/// How a CI provider uses the event type passed to pipeline discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSupport {
    /// Pipelines sharing a SHA can only be told apart by their trigger
    Required,
    /// Filter on the trigger when one is given
    Optional,
    /// One pipeline per SHA; the trigger is irrelevant
    Ignored,
}

/// What to do with the pipelines the scaffolding commit started before a
/// workflow makes its own changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitialPipelinePolicy {
    Cancel,
    WaitForCompletion,
}

impl CiType {
    pub const ALL: [CiType; 5] = [
        Self::GithubActions,
        Self::GitlabCi,
        Self::Jenkins,
        Self::Tekton,
        Self::Azure,
    ];

    /// Jenkins jobs here are wired to push webhooks only.
    pub fn supports_pull_request_triggers(self) -> bool {
        !matches!(self, Self::Jenkins)
    }

    pub fn event_support(self) -> EventSupport {
        match self {
            Self::Tekton => EventSupport::Required,
            Self::Jenkins => EventSupport::Ignored,
            Self::GithubActions | Self::GitlabCi | Self::Azure => EventSupport::Optional,
        }
    }

    /// Shared agents queue for a long time on Jenkins and Azure, so their
    /// leftover pipelines are cancelled rather than awaited.
    pub fn initial_pipeline_policy(self) -> InitialPipelinePolicy {
        match self {
            Self::Jenkins | Self::Azure => InitialPipelinePolicy::Cancel,
            Self::GithubActions | Self::GitlabCi | Self::Tekton => {
                InitialPipelinePolicy::WaitForCompletion
            }
        }
    }
}

impl fmt::Display for CiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GithubActions => "GitHub Actions",
            Self::GitlabCi => "GitLab CI",
            Self::Jenkins => "Jenkins",
            Self::Tekton => "Tekton",
            Self::Azure => "Azure Pipelines",
        })
    }
}

/// Pipeline operations the workflows need from a CI system.
///
/// Providers implement discovery, status polling, logs, listing and
/// cancellation of a single run. Waiting and bulk cancellation are shared
/// and built on those primitives.
#[async_trait]
pub trait Ci: Send + Sync {
    fn ci_type(&self) -> CiType;

    /// Repositories whose pipelines this provider watches, source first.
    fn repositories(&self) -> Vec<String>;

    /// Finds the pipeline triggered by `reference`.
    ///
    /// Returns `Ok(None)` while no run is visible yet, when the runs do not
    /// match `event_type`, or when the latest run is not in
    /// `desired_status` (`Unknown` accepts any status).
    async fn get_pipeline(
        &self,
        reference: &PullRequest,
        desired_status: PipelineStatus,
        event_type: Option<EventType>,
    ) -> Result<Option<Pipeline>>;

    /// Current status of a discovered pipeline.
    async fn check_pipeline_status(&self, pipeline: &Pipeline) -> Result<PipelineStatus>;

    async fn get_pipeline_logs(&self, pipeline: &Pipeline) -> Result<String>;

    /// Recent pipelines of `repository`, any status.
    async fn list_pipelines(&self, repository: &str) -> Result<Vec<Pipeline>>;

    async fn cancel_pipeline(&self, pipeline: &Pipeline) -> Result<()>;

    fn poll_interval(&self) -> Duration {
        PollSettings::default().interval
    }

    /// Polls `pipeline` in place until it is terminal or `timeout` elapses.
    ///
    /// Returns `Unknown` on timeout.
    async fn wait_for_pipeline_to_finish(
        &self,
        pipeline: &mut Pipeline,
        timeout: Duration,
    ) -> PipelineStatus {
        waiting::wait_for_pipeline(self, pipeline, PollSettings::new(self.poll_interval(), timeout))
            .await
    }

    async fn cancel_all_pipelines(&self, options: &CancelPipelineOptions) -> CancelResult {
        cancellation::cancel_all_pipelines(self, &self.repositories(), options).await
    }

    /// Waits until no watched repository has an active pipeline.
    ///
    /// Returns `false` when `timeout` elapsed first.
    async fn wait_for_all_pipeline_runs_to_finish(&self, timeout: Duration) -> bool {
        waiting::wait_for_all_pipelines(
            self,
            &self.repositories(),
            PollSettings::new(self.poll_interval(), timeout),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_jenkins_lacks_pull_request_triggers() {
        for ci_type in CiType::ALL {
            assert_eq!(
                ci_type.supports_pull_request_triggers(),
                ci_type != CiType::Jenkins,
                "{ci_type}"
            );
        }
    }

    #[test]
    fn tekton_requires_event_type_and_jenkins_ignores_it() {
        assert_eq!(CiType::Tekton.event_support(), EventSupport::Required);
        assert_eq!(CiType::Jenkins.event_support(), EventSupport::Ignored);
        assert_eq!(CiType::GitlabCi.event_support(), EventSupport::Optional);
    }

    #[test]
    fn slow_queues_cancel_initial_pipelines() {
        assert_eq!(
            CiType::Jenkins.initial_pipeline_policy(),
            InitialPipelinePolicy::Cancel
        );
        assert_eq!(
            CiType::Tekton.initial_pipeline_policy(),
            InitialPipelinePolicy::WaitForCompletion
        );
    }
}
