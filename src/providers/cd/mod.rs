mod argocd;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::{sleep, Instant};

use crate::error::Result;
use crate::model::{same_revision, short_sha, Environment, PollSettings};

pub use argocd::ArgoCd;

const SYNCED: &str = "Synced";

/// A CD application deploying the component into one environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Application {
    pub name: String,
    pub environment: Environment,
    pub observation: SyncObservation,
}

/// What the CD controller last reported about an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncObservation {
    /// Revision the application is synced to
    pub revision: Option<String>,
    /// `Synced`, `OutOfSync`, `Unknown`
    pub sync_status: Option<String>,
    /// `Healthy`, `Progressing`, `Degraded`, ...
    pub health_status: Option<String>,
    /// Phase of the last sync operation
    pub operation_phase: Option<String>,
    /// Revision the last sync operation targeted
    pub operation_revision: Option<String>,
    pub message: Option<String>,
}

impl SyncObservation {
    pub fn is_synced_at(&self, expected_revision: &str) -> bool {
        self.sync_status.as_deref() == Some(SYNCED)
            && self
                .revision
                .as_deref()
                .is_some_and(|r| same_revision(r, expected_revision))
    }

    /// A sync operation towards `expected_revision` ended in error.
    pub fn has_failed_at(&self, expected_revision: &str) -> bool {
        matches!(self.operation_phase.as_deref(), Some("Failed" | "Error"))
            && self
                .operation_revision
                .as_deref()
                .or(self.revision.as_deref())
                .is_some_and(|r| same_revision(r, expected_revision))
    }

    /// One-line summary used as the status of a [`SyncResult`].
    pub fn describe(&self) -> String {
        let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
        format!(
            "sync={} health={} revision={} phase={}",
            field(&self.sync_status),
            field(&self.health_status),
            self.revision.as_deref().map_or("-", short_sha),
            field(&self.operation_phase)
        )
    }
}

/// Outcome of waiting for an application to sync. Never an error: callers
/// decide whether `synced: false` is fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub synced: bool,
    pub status: String,
    pub message: Option<String>,
}

/// Application lookup and sync operations of a GitOps CD controller.
#[async_trait]
pub trait ContinuousDelivery: Send + Sync {
    /// Name of the application deploying the component into `environment`.
    fn application_name(&self, environment: Environment) -> String;

    /// `Ok(None)` when the application does not exist.
    async fn get_application(&self, environment: Environment) -> Result<Option<Application>>;

    /// Requests a sync to the head of the GitOps repository.
    async fn sync_application(&self, environment: Environment) -> Result<()>;

    async fn observe_sync(&self, environment: Environment) -> Result<SyncObservation>;

    fn sync_poll(&self) -> PollSettings {
        PollSettings::default()
    }

    /// Polls until the application is `Synced` at `expected_revision`.
    ///
    /// `OutOfSync` and `Progressing` are expected on the way. A failed sync
    /// operation at `expected_revision` or the timeout end the wait with
    /// `synced: false`.
    async fn wait_until_application_is_synced(
        &self,
        environment: Environment,
        expected_revision: &str,
    ) -> SyncResult {
        wait_for_sync(self, environment, expected_revision, self.sync_poll()).await
    }
}

pub async fn wait_for_sync<D>(
    cd: &D,
    environment: Environment,
    expected_revision: &str,
    poll: PollSettings,
) -> SyncResult
where
    D: ContinuousDelivery + ?Sized,
{
    let application = cd.application_name(environment);
    let started = Instant::now();
    let mut last = SyncObservation::default();

    loop {
        match cd.observe_sync(environment).await {
            Ok(observation) => {
                if observation.is_synced_at(expected_revision) {
                    info!(
                        "{application} synced at {} ({})",
                        short_sha(expected_revision),
                        observation.describe()
                    );
                    return SyncResult {
                        synced: true,
                        status: observation.describe(),
                        message: observation.message,
                    };
                }
                if observation.has_failed_at(expected_revision) {
                    warn!("{application} sync failed: {}", observation.describe());
                    return SyncResult {
                        synced: false,
                        status: observation.describe(),
                        message: observation.message,
                    };
                }
                debug!(
                    "{application} not synced at {} yet: {}",
                    short_sha(expected_revision),
                    observation.describe()
                );
                last = observation;
            }
            Err(e) => warn!("Failed to read sync state of {application}: {e}"),
        }

        if started.elapsed() >= poll.timeout {
            warn!(
                "{application} not synced at {} after {}s",
                short_sha(expected_revision),
                poll.timeout.as_secs()
            );
            return SyncResult {
                synced: false,
                status: last.describe(),
                message: Some(format!(
                    "timed out after {}s waiting for revision {expected_revision}",
                    poll.timeout.as_secs()
                )),
            };
        }

        sleep(poll.interval).await;
    }
}
