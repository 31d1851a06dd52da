mod tpa;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use tpa::Tpa;

/// An SBOM document as indexed by the search service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbomSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub document_id: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// Lookups against an SBOM search service. `Ok(None)` means not indexed.
#[async_trait]
pub trait SbomSearch: Send + Sync {
    /// `sha256` is the hex digest, with or without the `sha256:` prefix.
    async fn search_sbom_by_sha256(&self, sha256: &str) -> Result<Option<SbomSummary>>;

    async fn search_sbom_by_name_and_doc_id(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<Option<SbomSummary>>;
}

/// Hex digest of a pinned image reference (`repo@sha256:<hex>`).
pub fn image_digest(image: &str) -> Option<&str> {
    let (_, digest) = image.rsplit_once("@sha256:")?;
    (!digest.is_empty() && digest.chars().all(|c| c.is_ascii_hexdigit())).then_some(digest)
}

/// Repository part of an image reference, without tag or digest.
pub fn image_name(image: &str) -> &str {
    let without_digest = image.split('@').next().unwrap_or(image);
    match without_digest.rsplit_once(':') {
        // a colon before the last '/' belongs to a registry port
        Some((name, tag)) if !tag.contains('/') => name,
        _ => without_digest,
    }
}
