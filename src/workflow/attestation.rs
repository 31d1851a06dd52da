use log::info;
use serde::Serialize;

use crate::error::{HarnessError, Result};
use crate::providers::sbom::{image_digest, image_name, SbomSummary};
use crate::retry::{retry, Retryable};

use super::WorkflowContext;

/// Which SBOM to look for.
#[derive(Debug, Clone, Serialize)]
pub struct SbomQuery {
    /// Image reference, pinned by digest unless `document_id` is set
    pub image: String,
    /// Search by image name and document id instead of the digest
    pub document_id: Option<String>,
}

impl SbomQuery {
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            document_id: None,
        }
    }
}

/// Waits for the SBOM of an image to be indexed.
///
/// Indexing lags behind the build, so a missing SBOM is retried within
/// `sbom_retry`. Exhaustion fails with `RetriesExhausted` wrapping
/// `SbomNotFound`.
pub async fn verify_sbom(ctx: &WorkflowContext, query: &SbomQuery) -> Result<SbomSummary> {
    let sbom = ctx
        .sbom
        .as_deref()
        .ok_or_else(|| HarnessError::Unsupported("no SBOM service configured".to_string()))?;

    let digest = match &query.document_id {
        Some(_) => None,
        None => Some(image_digest(&query.image).ok_or_else(|| {
            HarnessError::Precondition(format!("{} is not pinned by digest", query.image))
        })?),
    };

    let operation = format!("Find SBOM of {}", query.image);
    let summary = retry(&operation, &ctx.settings.sbom_retry, |_| async move {
        let found = match (digest, &query.document_id) {
            (Some(digest), _) => sbom.search_sbom_by_sha256(digest).await,
            (None, Some(document_id)) => {
                sbom.search_sbom_by_name_and_doc_id(image_name(&query.image), document_id)
                    .await
            }
            (None, None) => Ok(None),
        };
        match found {
            Ok(Some(summary)) => Retryable::Success(summary),
            Ok(None) => Retryable::Continue(HarnessError::SbomNotFound(query.image.clone())),
            Err(e) => Retryable::from_result(Err(e)),
        }
    })
    .await?;

    info!("SBOM {} found for {}", summary.id, query.image);
    Ok(summary)
}
