use async_trait::async_trait;
use log::info;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{Auth, Token};
use crate::error::{HarnessError, Result};
use crate::http::ApiClient;
use crate::model::{Environment, PollSettings};
use crate::retry::RetryOptions;

use super::{Application, ContinuousDelivery, SyncObservation};

const OPERATION_IN_PROGRESS: &str = "another operation is already in progress";

/// Argo CD applications named `<prefix><component>-<environment>`.
pub struct ArgoCd {
    api: ApiClient,
    component: String,
    application_prefix: String,
    poll: PollSettings,
}

#[derive(Deserialize)]
struct ArgoApplication {
    metadata: ArgoMetadata,
    #[serde(default)]
    status: ArgoStatus,
}

#[derive(Deserialize)]
struct ArgoMetadata {
    name: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ArgoStatus {
    sync: Option<SyncStatus>,
    health: Option<HealthStatus>,
    operation_state: Option<OperationState>,
}

#[derive(Deserialize)]
struct SyncStatus {
    status: Option<String>,
    revision: Option<String>,
}

#[derive(Deserialize)]
struct HealthStatus {
    status: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationState {
    phase: Option<String>,
    message: Option<String>,
    sync_result: Option<OperationSyncResult>,
}

#[derive(Deserialize)]
struct OperationSyncResult {
    revision: Option<String>,
}

impl ArgoStatus {
    fn into_observation(self) -> SyncObservation {
        let (revision, sync_status) = self
            .sync
            .map(|s| (s.revision, s.status))
            .unwrap_or_default();
        let (health_status, health_message) = self
            .health
            .map(|h| (h.status, h.message))
            .unwrap_or_default();
        let (operation_phase, operation_message, operation_revision) = self
            .operation_state
            .map(|o| (o.phase, o.message, o.sync_result.and_then(|r| r.revision)))
            .unwrap_or_default();

        SyncObservation {
            revision,
            sync_status,
            health_status,
            operation_phase,
            operation_revision,
            message: operation_message.or(health_message),
        }
    }
}

impl ArgoCd {
    /// # Arguments
    ///
    /// * `base_url` - Argo CD server URL
    /// * `token` - Argo CD API token
    /// * `component` - Component whose applications are managed
    /// * `application_prefix` - Prefix shared by the component's applications
    pub fn new(
        base_url: &str,
        token: Option<Token>,
        component: &str,
        application_prefix: &str,
    ) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(base_url, Auth::bearer(token))?,
            component: component.to_string(),
            application_prefix: application_prefix.to_string(),
            poll: PollSettings::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.api = self.api.with_retry(retry);
        self
    }

    pub fn with_sync_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    fn application_path(&self, environment: Environment) -> String {
        format!("api/v1/applications/{}", self.application_name(environment))
    }

    async fn fetch(&self, environment: Environment) -> Result<ArgoApplication> {
        self.api
            .get_json(
                &self.application_path(environment),
                &[("refresh", "normal".to_string())],
            )
            .await
    }
}

#[async_trait]
impl ContinuousDelivery for ArgoCd {
    fn application_name(&self, environment: Environment) -> String {
        format!("{}{}-{environment}", self.application_prefix, self.component)
    }

    async fn get_application(&self, environment: Environment) -> Result<Option<Application>> {
        match self.fetch(environment).await {
            Ok(app) => Ok(Some(Application {
                name: app.metadata.name,
                environment,
                observation: app.status.into_observation(),
            })),
            Err(HarnessError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn sync_application(&self, environment: Environment) -> Result<()> {
        let name = self.application_name(environment);
        let result: Result<serde_json::Value> = self
            .api
            .send_json(
                Method::POST,
                &format!("{}/sync", self.application_path(environment)),
                &json!({ "prune": true }),
            )
            .await;

        match result {
            Ok(_) => {
                info!("Requested sync of {name}");
                Ok(())
            }
            Err(HarnessError::Api { ref message, .. }) if message.contains(OPERATION_IN_PROGRESS) => {
                info!("Sync of {name} already in progress");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn observe_sync(&self, environment: Environment) -> Result<SyncObservation> {
        Ok(self.fetch(environment).await?.status.into_observation())
    }

    fn sync_poll(&self) -> PollSettings {
        self.poll
    }
}
