use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use crate::auth::{Auth, Token};
use crate::error::{HarnessError, Result};
use crate::http::ApiClient;
use crate::retry::RetryOptions;

use super::{SbomSearch, SbomSummary};

/// Trusted Profile Analyzer v2 API.
pub struct Tpa {
    api: ApiClient,
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    items: Vec<SbomSummary>,
}

impl Tpa {
    /// # Arguments
    ///
    /// * `base_url` - TPA server URL
    /// * `token` - OIDC access token
    pub fn new(base_url: &str, token: Option<Token>) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(base_url, Auth::bearer(token))?,
        })
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.api = self.api.with_retry(retry);
        self
    }
}

#[async_trait]
impl SbomSearch for Tpa {
    async fn search_sbom_by_sha256(&self, sha256: &str) -> Result<Option<SbomSummary>> {
        let hex = sha256.trim_start_matches("sha256:");
        match self
            .api
            .get_json(&format!("api/v2/sbom/sha256:{hex}"), &[])
            .await
        {
            Ok(sbom) => Ok(Some(sbom)),
            Err(HarnessError::NotFound(_)) => {
                debug!("No SBOM indexed for sha256:{hex}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn search_sbom_by_name_and_doc_id(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<Option<SbomSummary>> {
        let page: Page = self
            .api
            .get_json("api/v2/sbom", &[("q", format!("name={name}"))])
            .await?;
        Ok(page
            .items
            .into_iter()
            .find(|sbom| sbom.document_id.as_deref() == Some(document_id)))
    }
}
