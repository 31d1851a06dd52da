//! In-memory capability fakes for workflow tests.
//!
//! Scripted sequences replay in order and then repeat their last value.
//! Clones share state, so a test can keep a handle for assertions after
//! moving a fake into a [`WorkflowContext`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{HarnessError, Result};
use crate::model::{Environment, EventType, Pipeline, PipelineStatus, PollSettings, PullRequest};
use crate::providers::cd::{wait_for_sync, Application, ContinuousDelivery, SyncObservation, SyncResult};
use crate::providers::ci::{Ci, CiType};
use crate::providers::git::{gitops, FileChange, Git, GitType, Repositories};
use crate::providers::sbom::{SbomSearch, SbomSummary};
use crate::workflow::{WorkflowContext, WorkflowSettings};

fn next_sticky<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable(what: &str) -> HarnessError {
    HarnessError::Api {
        status: 503,
        message: format!("{what} unavailable"),
        code: None,
    }
}

/// Context over the three fakes, without an SBOM service.
pub fn context(git: FakeGit, ci: FakeCi, cd: FakeCd) -> WorkflowContext {
    WorkflowContext {
        git: Arc::new(git),
        ci: Arc::new(ci),
        cd: Arc::new(cd),
        sbom: None,
        settings: WorkflowSettings::default(),
    }
}

#[derive(Default)]
struct CiState {
    statuses: VecDeque<PipelineStatus>,
    status_errors: u32,
    status_checks: usize,
    listings: HashMap<String, VecDeque<Vec<Pipeline>>>,
    unreachable: Vec<String>,
    cancel_failures: HashMap<String, u16>,
    cancelled: Vec<String>,
    discoveries: VecDeque<Option<Pipeline>>,
    discovery_events: Vec<Option<EventType>>,
    logs: String,
}

#[derive(Clone)]
pub struct FakeCi {
    ci_type: CiType,
    repos: Vec<String>,
    state: Arc<Mutex<CiState>>,
}

impl FakeCi {
    pub fn new() -> Self {
        Self {
            ci_type: CiType::GitlabCi,
            repos: vec!["checkout".to_string(), "checkout-gitops".to_string()],
            state: Arc::default(),
        }
    }

    pub fn with_ci_type(mut self, ci_type: CiType) -> Self {
        self.ci_type = ci_type;
        self
    }

    /// Results of successive status checks.
    pub fn with_statuses(self, statuses: Vec<PipelineStatus>) -> Self {
        lock(&self.state).statuses = statuses.into();
        self
    }

    /// The next status check fails before the scripted ones apply.
    pub fn with_status_error_once(self) -> Self {
        lock(&self.state).status_errors += 1;
        self
    }

    pub fn with_listing(self, repository: &str, pipelines: Vec<Pipeline>) -> Self {
        self.with_listing_sequence(repository, vec![pipelines])
    }

    pub fn with_listing_sequence(self, repository: &str, listings: Vec<Vec<Pipeline>>) -> Self {
        lock(&self.state)
            .listings
            .insert(repository.to_string(), listings.into());
        self
    }

    pub fn with_listing_error(self, repository: &str) -> Self {
        lock(&self.state).unreachable.push(repository.to_string());
        self
    }

    pub fn with_cancel_failure(self, id: &str, status: u16) -> Self {
        lock(&self.state)
            .cancel_failures
            .insert(id.to_string(), status);
        self
    }

    /// Results of successive discovery lookups.
    pub fn with_discoveries(self, discoveries: Vec<Option<Pipeline>>) -> Self {
        lock(&self.state).discoveries = discoveries.into();
        self
    }

    pub fn with_logs(self, logs: &str) -> Self {
        lock(&self.state).logs = logs.to_string();
        self
    }

    pub fn status_checks(&self) -> usize {
        lock(&self.state).status_checks
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        lock(&self.state).cancelled.clone()
    }

    pub fn discovery_calls(&self) -> usize {
        lock(&self.state).discovery_events.len()
    }

    /// Event type of every discovery lookup, in order.
    pub fn discovery_events(&self) -> Vec<Option<EventType>> {
        lock(&self.state).discovery_events.clone()
    }
}

#[async_trait]
impl Ci for FakeCi {
    fn ci_type(&self) -> CiType {
        self.ci_type
    }

    fn repositories(&self) -> Vec<String> {
        self.repos.clone()
    }

    async fn get_pipeline(
        &self,
        reference: &PullRequest,
        _desired_status: PipelineStatus,
        event_type: Option<EventType>,
    ) -> Result<Option<Pipeline>> {
        let mut state = lock(&self.state);
        state.discovery_events.push(event_type);
        Ok(next_sticky(&mut state.discoveries).flatten().map(|mut pipeline| {
            pipeline.sha = reference.sha.clone();
            pipeline.repository = reference.repository.clone();
            pipeline
        }))
    }

    async fn check_pipeline_status(&self, _pipeline: &Pipeline) -> Result<PipelineStatus> {
        let mut state = lock(&self.state);
        state.status_checks += 1;
        if state.status_errors > 0 {
            state.status_errors -= 1;
            return Err(unavailable("status"));
        }
        Ok(next_sticky(&mut state.statuses).unwrap_or(PipelineStatus::Running))
    }

    async fn get_pipeline_logs(&self, _pipeline: &Pipeline) -> Result<String> {
        Ok(lock(&self.state).logs.clone())
    }

    async fn list_pipelines(&self, repository: &str) -> Result<Vec<Pipeline>> {
        let mut state = lock(&self.state);
        if state.unreachable.iter().any(|r| r == repository) {
            return Err(unavailable(repository));
        }
        Ok(state
            .listings
            .get_mut(repository)
            .and_then(next_sticky)
            .unwrap_or_default())
    }

    async fn cancel_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(status) = state.cancel_failures.get(&pipeline.id) {
            return Err(HarnessError::Api {
                status: *status,
                message: format!("cannot cancel {}", pipeline.id),
                code: Some("fake_error".to_string()),
            });
        }
        state.cancelled.push(pipeline.id.clone());
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(5)
    }
}

#[derive(Default)]
struct CdState {
    observations: VecDeque<SyncObservation>,
    observations_made: usize,
    follow_awaited: bool,
    awaited: Vec<String>,
    missing: Vec<Environment>,
    sync_requests: Vec<Environment>,
}

#[derive(Clone, Default)]
pub struct FakeCd {
    state: Arc<Mutex<CdState>>,
}

impl FakeCd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observations(self, observations: Vec<SyncObservation>) -> Self {
        lock(&self.state).observations = observations.into();
        self
    }

    /// Every application reports itself synced at the revision last waited for.
    pub fn synced_at_latest_request(self) -> Self {
        lock(&self.state).follow_awaited = true;
        self
    }

    pub fn without_application(self, environment: Environment) -> Self {
        lock(&self.state).missing.push(environment);
        self
    }

    pub fn observations_made(&self) -> usize {
        lock(&self.state).observations_made
    }

    /// Revisions passed to `wait_until_application_is_synced`, in order.
    pub fn awaited_revisions(&self) -> Vec<String> {
        lock(&self.state).awaited.clone()
    }

    pub fn sync_requests(&self) -> Vec<Environment> {
        lock(&self.state).sync_requests.clone()
    }
}

#[async_trait]
impl ContinuousDelivery for FakeCd {
    fn application_name(&self, environment: Environment) -> String {
        format!("checkout-{environment}")
    }

    async fn get_application(&self, environment: Environment) -> Result<Option<Application>> {
        if lock(&self.state).missing.contains(&environment) {
            return Ok(None);
        }
        Ok(Some(Application {
            name: self.application_name(environment),
            environment,
            observation: SyncObservation::default(),
        }))
    }

    async fn sync_application(&self, environment: Environment) -> Result<()> {
        lock(&self.state).sync_requests.push(environment);
        Ok(())
    }

    async fn observe_sync(&self, _environment: Environment) -> Result<SyncObservation> {
        let mut state = lock(&self.state);
        state.observations_made += 1;
        if state.follow_awaited {
            if let Some(revision) = state.awaited.last() {
                return Ok(SyncObservation {
                    revision: Some(revision.clone()),
                    sync_status: Some("Synced".to_string()),
                    health_status: Some("Healthy".to_string()),
                    operation_phase: Some("Succeeded".to_string()),
                    operation_revision: Some(revision.clone()),
                    message: None,
                });
            }
        }
        Ok(next_sticky(&mut state.observations).unwrap_or_default())
    }

    fn sync_poll(&self) -> PollSettings {
        PollSettings::new(Duration::from_secs(5), Duration::from_secs(60))
    }

    async fn wait_until_application_is_synced(
        &self,
        environment: Environment,
        expected_revision: &str,
    ) -> SyncResult {
        lock(&self.state).awaited.push(expected_revision.to_string());
        wait_for_sync(self, environment, expected_revision, self.sync_poll()).await
    }
}

struct OpenPullRequest {
    pull_request: PullRequest,
    head: String,
    base: String,
}

#[derive(Default)]
struct GitState {
    /// (repository, branch, path) -> content
    files: HashMap<(String, String, String), String>,
    /// (repository, branch) -> head SHA
    heads: HashMap<(String, String), String>,
    commits: u64,
    pull_requests: Vec<OpenPullRequest>,
    merged: usize,
}

impl GitState {
    fn next_sha(&mut self) -> String {
        self.commits += 1;
        format!("{:0<40}", format!("{:x}c0ffee", self.commits))
    }

    fn copy_branch(&mut self, repository: &str, from: &str, to: &str) {
        let copied: Vec<_> = self
            .files
            .iter()
            .filter(|((repo, branch, _), _)| repo == repository && branch == from)
            .map(|((_, _, path), content)| (path.clone(), content.clone()))
            .collect();
        for (path, content) in copied {
            self.files
                .insert((repository.to_string(), to.to_string(), path), content);
        }
    }
}

/// Source and GitOps repositories of the `checkout` component.
#[derive(Clone)]
pub struct FakeGit {
    repos: Repositories,
    state: Arc<Mutex<GitState>>,
}

impl FakeGit {
    pub fn new() -> Self {
        let repos = Repositories::for_component("acme", "checkout");
        let mut state = GitState::default();
        for repository in [&repos.source, &repos.gitops] {
            let sha = state.next_sha();
            state
                .heads
                .insert((repository.clone(), repos.default_branch.clone()), sha);
        }
        Self {
            repos,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Declares `image` for `environment` on the GitOps default branch.
    pub fn with_image(self, environment: Environment, image: &str) -> Self {
        let path = gitops::deployment_patch_path(&self.repos.component, environment);
        let manifest = format!(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: checkout\nspec:\n  template:\n    spec:\n      containers:\n        - name: checkout\n          image: {image}\n"
        );
        lock(&self.state).files.insert(
            (self.repos.gitops.clone(), self.repos.default_branch.clone(), path),
            manifest,
        );
        self
    }

    /// Image declared for `environment` on the GitOps default branch.
    pub fn image(&self, environment: Environment) -> Option<String> {
        let path = gitops::deployment_patch_path(&self.repos.component, environment);
        let state = lock(&self.state);
        let content = state.files.get(&(
            self.repos.gitops.clone(),
            self.repos.default_branch.clone(),
            path,
        ))?;
        gitops::extract_image(content)
    }

    pub fn opened_pull_requests(&self) -> usize {
        lock(&self.state).pull_requests.len()
    }

    pub fn merged_pull_requests(&self) -> usize {
        lock(&self.state).merged
    }
}

#[async_trait]
impl Git for FakeGit {
    fn git_type(&self) -> GitType {
        GitType::Github
    }

    fn repositories(&self) -> &Repositories {
        &self.repos
    }

    async fn get_commit_sha(&self, repository: &str, branch: &str) -> Result<String> {
        lock(&self.state)
            .heads
            .get(&(repository.to_string(), branch.to_string()))
            .cloned()
            .ok_or_else(|| HarnessError::NotFound(format!("branch {branch} of {repository}")))
    }

    async fn read_file(&self, repository: &str, branch: &str, path: &str) -> Result<String> {
        lock(&self.state)
            .files
            .get(&(repository.to_string(), branch.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| HarnessError::NotFound(format!("{path} in {repository}")))
    }

    async fn commit_file(
        &self,
        repository: &str,
        branch: &str,
        base: &str,
        change: &FileChange,
        _message: &str,
    ) -> Result<String> {
        let mut state = lock(&self.state);
        let branch_key = (repository.to_string(), branch.to_string());
        if !state.heads.contains_key(&branch_key) {
            if !state.heads.contains_key(&(repository.to_string(), base.to_string())) {
                return Err(HarnessError::NotFound(format!("branch {base} of {repository}")));
            }
            state.copy_branch(repository, base, branch);
        }
        state.files.insert(
            (repository.to_string(), branch.to_string(), change.path.clone()),
            change.content.clone(),
        );
        let sha = state.next_sha();
        state.heads.insert(branch_key, sha.clone());
        Ok(sha)
    }

    async fn open_pull_request(
        &self,
        repository: &str,
        head: &str,
        base: &str,
        _title: &str,
    ) -> Result<PullRequest> {
        let mut state = lock(&self.state);
        let sha = state
            .heads
            .get(&(repository.to_string(), head.to_string()))
            .cloned()
            .ok_or_else(|| HarnessError::NotFound(format!("branch {head} of {repository}")))?;
        let number = state.pull_requests.len() as u64 + 1;
        let mut pull_request = PullRequest::new(number, sha, repository);
        pull_request.url = Some(format!("https://git.local/{repository}/pull/{number}"));
        state.pull_requests.push(OpenPullRequest {
            pull_request: pull_request.clone(),
            head: head.to_string(),
            base: base.to_string(),
        });
        Ok(pull_request)
    }

    async fn merge_pull_request(&self, pull_request: &PullRequest) -> Result<PullRequest> {
        let mut state = lock(&self.state);
        let (head, base) = state
            .pull_requests
            .iter()
            .find(|open| open.pull_request == *pull_request)
            .map(|open| (open.head.clone(), open.base.clone()))
            .ok_or_else(|| HarnessError::NotFound(pull_request.describe()))?;
        let repository = pull_request.repository.clone();
        state.copy_branch(&repository, &head, &base);
        let sha = state.next_sha();
        state.heads.insert((repository, base), sha.clone());
        state.merged += 1;
        Ok(pull_request.to_merged(sha, Utc::now()))
    }
}

#[derive(Default)]
struct SbomState {
    results: VecDeque<Option<SbomSummary>>,
    digests: Vec<String>,
    names: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct FakeSbom {
    state: Arc<Mutex<SbomState>>,
}

impl FakeSbom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results of successive searches of either kind.
    pub fn with_results(self, results: Vec<Option<SbomSummary>>) -> Self {
        lock(&self.state).results = results.into();
        self
    }

    pub fn digests_searched(&self) -> Vec<String> {
        lock(&self.state).digests.clone()
    }

    pub fn names_searched(&self) -> Vec<(String, String)> {
        lock(&self.state).names.clone()
    }
}

#[async_trait]
impl SbomSearch for FakeSbom {
    async fn search_sbom_by_sha256(&self, sha256: &str) -> Result<Option<SbomSummary>> {
        let mut state = lock(&self.state);
        state.digests.push(sha256.to_string());
        Ok(next_sticky(&mut state.results).flatten())
    }

    async fn search_sbom_by_name_and_doc_id(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<Option<SbomSummary>> {
        let mut state = lock(&self.state);
        state
            .names
            .push((name.to_string(), document_id.to_string()));
        Ok(next_sticky(&mut state.results).flatten())
    }
}
