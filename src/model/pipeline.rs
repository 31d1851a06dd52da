use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalised status of a CI pipeline run, shared by every CI provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
    Unknown,
}

impl PipelineStatus {
    pub const ALL: [PipelineStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Success,
        Self::Failure,
        Self::Cancelled,
        Self::Unknown,
    ];

    /// A terminal status is never left again by polling.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Maps a canonical status word to a [`PipelineStatus`].
///
/// Providers translate their native vocabulary into these words first, so
/// the same policy applies at discovery time and at every poll. Skipped runs
/// count as failures: a workflow step always expects an executed pipeline.
/// Unrecognised words map to `Unknown`.
pub fn map_pipeline_status(status: &str) -> PipelineStatus {
    match status.trim().to_ascii_lowercase().as_str() {
        "success" => PipelineStatus::Success,
        "failed" | "canceled" => PipelineStatus::Failure,
        "running" => PipelineStatus::Running,
        "pending" | "created" | "queued" | "manual" | "scheduled" => PipelineStatus::Pending,
        "skipped" => PipelineStatus::Failure,
        _ => PipelineStatus::Unknown,
    }
}

/// What triggered a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PullRequest,
    Push,
    Commit,
    Build,
}

impl EventType {
    /// Whether a run triggered by `trigger` satisfies a request for `self`.
    ///
    /// Pushes and direct commits are the same event from the CI side.
    pub fn matches(self, trigger: EventType) -> bool {
        match self {
            Self::PullRequest => trigger == Self::PullRequest,
            Self::Push | Self::Commit => matches!(trigger, Self::Push | Self::Commit),
            Self::Build => trigger == Self::Build,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PullRequest => "pull_request",
            Self::Push => "push",
            Self::Commit => "commit",
            Self::Build => "build",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pull_request" | "pr" => Ok(Self::PullRequest),
            "push" => Ok(Self::Push),
            "commit" => Ok(Self::Commit),
            "build" => Ok(Self::Build),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// One CI execution run correlated to a commit or pull request.
///
/// A `Pipeline` is owned by the polling loop that discovered it; that loop is
/// the only writer of `status`, so no synchronisation is involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Native run identifier (GitLab pipeline id, Jenkins build number,
    /// Tekton PipelineRun name, ...)
    pub id: String,
    pub status: PipelineStatus,
    pub repository: String,
    pub sha: String,
    /// Workflow, job or PipelineRun name
    pub name: Option<String>,
    pub branch: Option<String>,
    pub event_type: Option<EventType>,
    pub web_url: Option<String>,
    pub logs: Option<String>,
    /// Provider payload the pipeline was built from
    pub raw: Option<serde_json::Value>,
}

impl Pipeline {
    pub fn new(id: impl Into<String>, repository: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: PipelineStatus::Unknown,
            repository: repository.into(),
            sha: sha.into(),
            name: None,
            branch: None,
            event_type: None,
            web_url: None,
            logs: None,
            raw: None,
        }
    }

    pub fn with_status(mut self, status: PipelineStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Human-readable label used in logs and tables.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} #{}", self.id),
            None => format!("#{}", self.id),
        }
    }
}
