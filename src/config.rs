use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::HarnessError;
use crate::model::{CancelPipelineOptions, PollSettings};
use crate::providers::ci::CiType;
use crate::providers::git::{GitType, Repositories};
use crate::retry::RetryOptions;
use crate::workflow::WorkflowSettings;

/// Configuration file structure for promoctl.
///
/// Describes the component under test and how to reach every system the
/// workflows talk to. Files are loaded from the current directory or a
/// given path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub component: ComponentConfig,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub ci: CiConfig,

    #[serde(default)]
    pub cd: CdConfig,

    /// SBOM search service; verification is unavailable without it
    #[serde(default)]
    pub sbom: Option<SbomConfig>,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Defaults for `cancel-pipelines`
    #[serde(default)]
    pub cancel: CancelPipelineOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ComponentConfig {
    /// Component name; also the default source repository name
    pub name: Option<String>,

    /// Organisation, group or workspace owning the repositories
    pub owner: Option<String>,

    /// Defaults to `<name>`
    pub source_repo: Option<String>,

    /// Defaults to `<name>-gitops`
    pub gitops_repo: Option<String>,

    #[serde(default = "default_branch")]
    pub default_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitConfig {
    #[serde(default = "default_git_provider")]
    pub provider: GitType,

    /// API base URL; the provider's public instance when unset
    pub base_url: Option<String>,

    pub token: Option<String>,

    /// Bitbucket user the app password belongs to
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CiConfig {
    #[serde(default = "default_ci_provider")]
    pub provider: CiType,

    /// Jenkins root, Kubernetes API server or Azure DevOps organisation URL.
    /// Defaults to the Git provider's API for GitHub Actions and GitLab CI.
    pub base_url: Option<String>,

    pub token: Option<String>,

    /// Jenkins user the API token belongs to
    pub username: Option<String>,

    /// Jenkins folder holding the component jobs
    pub folder: Option<String>,

    /// Tekton namespace running the PipelineRuns
    pub namespace: Option<String>,

    /// Azure DevOps project
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CdConfig {
    /// Argo CD server URL
    pub base_url: Option<String>,

    pub token: Option<String>,

    /// Prefix shared by the component's Argo CD applications
    #[serde(default)]
    pub application_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SbomConfig {
    /// Trusted Profile Analyzer URL
    pub base_url: String,

    pub token: Option<String>,
}

/// Timeouts and retry budgets, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkflowConfig {
    #[serde(default = "default_pipeline_timeout")]
    pub pipeline_timeout: u64,

    #[serde(default = "default_discovery_retries")]
    pub discovery_retries: u32,

    #[serde(default = "default_discovery_min_delay")]
    pub discovery_min_delay: u64,

    #[serde(default = "default_discovery_max_delay")]
    pub discovery_max_delay: u64,

    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    #[serde(default = "default_sync_timeout")]
    pub sync_timeout: u64,

    #[serde(default = "default_sbom_retries")]
    pub sbom_retries: u32,

    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: u64,

    /// Retries of a single API request on transient failures
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            name: None,
            owner: None,
            source_repo: None,
            gitops_repo: None,
            default_branch: default_branch(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            provider: default_git_provider(),
            base_url: None,
            token: None,
            username: None,
        }
    }
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            provider: default_ci_provider(),
            base_url: None,
            token: None,
            username: None,
            folder: None,
            namespace: None,
            project: None,
        }
    }
}

impl Default for CdConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            application_prefix: String::new(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            pipeline_timeout: default_pipeline_timeout(),
            discovery_retries: default_discovery_retries(),
            discovery_min_delay: default_discovery_min_delay(),
            discovery_max_delay: default_discovery_max_delay(),
            sync_interval: default_sync_interval(),
            sync_timeout: default_sync_timeout(),
            sbom_retries: default_sbom_retries(),
            drain_timeout: default_drain_timeout(),
            request_retries: default_request_retries(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_git_provider() -> GitType {
    GitType::Github
}

fn default_ci_provider() -> CiType {
    CiType::GithubActions
}

fn default_pipeline_timeout() -> u64 {
    600
}

fn default_discovery_retries() -> u32 {
    5
}

fn default_discovery_min_delay() -> u64 {
    10
}

fn default_discovery_max_delay() -> u64 {
    30
}

fn default_sync_interval() -> u64 {
    5
}

fn default_sync_timeout() -> u64 {
    600
}

fn default_sbom_retries() -> u32 {
    10
}

fn default_drain_timeout() -> u64 {
    1200
}

fn default_request_retries() -> u32 {
    3
}

impl WorkflowConfig {
    pub fn settings(&self) -> WorkflowSettings {
        let defaults = WorkflowSettings::default();
        WorkflowSettings {
            pipeline_timeout: Duration::from_secs(self.pipeline_timeout),
            discovery_retry: RetryOptions::new(
                self.discovery_retries,
                Duration::from_secs(self.discovery_min_delay),
                Duration::from_secs(self.discovery_max_delay),
            ),
            sbom_retry: RetryOptions {
                retries: self.sbom_retries,
                ..defaults.sbom_retry
            },
            drain_timeout: Duration::from_secs(self.drain_timeout),
        }
    }

    pub fn sync_poll(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_secs(self.sync_interval),
            Duration::from_secs(self.sync_timeout),
        )
    }

    /// Backoff applied to every provider request.
    pub fn request_retry(&self) -> RetryOptions {
        RetryOptions::new(self.request_retries, Duration::from_secs(1), Duration::from_secs(10))
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./promoctl.toml
    /// 3. ./promoctl.json
    /// 4. ./promoctl.yaml
    /// 5. ./promoctl.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["promoctl.toml", "promoctl.json", "promoctl.yaml", "promoctl.yml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Source and GitOps repositories of the configured component.
    pub fn repositories(&self) -> crate::error::Result<Repositories> {
        let component = &self.component;
        let name = required(component.name.as_deref(), "component.name")?;
        let owner = required(component.owner.as_deref(), "component.owner")?;

        let mut repos = Repositories::for_component(owner, name);
        if let Some(source) = &component.source_repo {
            repos.source = source.clone();
        }
        if let Some(gitops) = &component.gitops_repo {
            repos.gitops = gitops.clone();
        }
        repos.default_branch = component.default_branch.clone();
        Ok(repos)
    }

    /// Checks that every setting the configured providers need is present.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.repositories()?;

        if self.git.provider == GitType::Bitbucket {
            required(self.git.username.as_deref(), "git.username")?;
            required(self.git.token.as_deref(), "git.token")?;
        }

        match self.ci.provider {
            CiType::GithubActions | CiType::GitlabCi => {}
            CiType::Jenkins => {
                required(self.ci.base_url.as_deref(), "ci.base-url")?;
                required(self.ci.username.as_deref(), "ci.username")?;
                required(self.ci.token.as_deref(), "ci.token")?;
            }
            CiType::Tekton => {
                required(self.ci.base_url.as_deref(), "ci.base-url")?;
                required(self.ci.namespace.as_deref(), "ci.namespace")?;
            }
            CiType::Azure => {
                required(self.ci.base_url.as_deref(), "ci.base-url")?;
                required(self.ci.project.as_deref(), "ci.project")?;
                required(self.ci.token.as_deref(), "ci.token")?;
            }
        }

        required(self.cd.base_url.as_deref(), "cd.base-url")?;

        let workflow = &self.workflow;
        if workflow.sync_interval == 0 {
            return Err(HarnessError::Config(
                "workflow.sync-interval must be at least 1 second".to_string(),
            ));
        }
        if workflow.discovery_min_delay > workflow.discovery_max_delay {
            return Err(HarnessError::Config(
                "workflow.discovery-min-delay exceeds workflow.discovery-max-delay".to_string(),
            ));
        }
        Ok(())
    }
}

fn required<'a>(value: Option<&'a str>, key: &str) -> crate::error::Result<&'a str> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(HarnessError::Config(format!("{key} is required"))),
    }
}
