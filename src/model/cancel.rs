use serde::{Deserialize, Serialize};

use super::pipeline::EventType;

/// Filters and execution knobs for bulk pipeline cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CancelPipelineOptions {
    /// Also cancel pipelines that already reached a terminal status
    #[serde(default)]
    pub include_completed: bool,

    /// Regular expressions matched against pipeline name and branch
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Only cancel pipelines triggered by this event
    pub event_type: Option<EventType>,

    /// Only cancel pipelines running on this branch
    pub branch: Option<String>,

    /// Number of cancellations issued in parallel per batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Report what would be cancelled without calling the provider
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for CancelPipelineOptions {
    fn default() -> Self {
        Self {
            include_completed: false,
            exclude_patterns: Vec::new(),
            event_type: None,
            branch: None,
            concurrency: default_concurrency(),
            dry_run: false,
        }
    }
}

fn default_concurrency() -> usize {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelOutcome {
    Cancelled,
    Failed,
    Skipped,
}

/// Per-pipeline record of what the cancellation engine did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelDetail {
    pub pipeline_id: String,
    pub name: Option<String>,
    pub repository: String,
    pub branch: Option<String>,
    pub outcome: CancelOutcome,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelErrorKind {
    /// The provider rejected or failed the cancel request
    Provider,
    /// The engine's own counters disagree with the number of pipelines seen
    Accounting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelError {
    pub kind: CancelErrorKind,
    pub pipeline_id: Option<String>,
    pub message: String,
    pub status_code: Option<u16>,
    pub provider_code: Option<String>,
}

/// Accumulated outcome of a bulk cancellation.
///
/// `cancelled + failed + skipped == total` holds for every result returned
/// by the engine; when it does not, an accounting error is appended to
/// `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelResult {
    pub total: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<CancelDetail>,
    pub errors: Vec<CancelError>,
}

impl CancelResult {
    pub fn record(&mut self, detail: CancelDetail) {
        match detail.outcome {
            CancelOutcome::Cancelled => self.cancelled += 1,
            CancelOutcome::Failed => self.failed += 1,
            CancelOutcome::Skipped => self.skipped += 1,
        }
        self.details.push(detail);
    }

    pub fn is_balanced(&self) -> bool {
        self.cancelled + self.failed + self.skipped == self.total
    }

    /// Appends an accounting error when the counters do not add up.
    pub fn check_accounting(&mut self) {
        if self.is_balanced() {
            return;
        }
        let accounted = self.cancelled + self.failed + self.skipped;
        self.errors.push(CancelError {
            kind: CancelErrorKind::Accounting,
            pipeline_id: None,
            message: format!(
                "accounting mismatch: cancelled ({}) + failed ({}) + skipped ({}) = {accounted}, expected total {}",
                self.cancelled, self.failed, self.skipped, self.total
            ),
            status_code: None,
            provider_code: None,
        });
    }

    pub fn accounting_errors(&self) -> impl Iterator<Item = &CancelError> {
        self.errors
            .iter()
            .filter(|e| e.kind == CancelErrorKind::Accounting)
    }
}
