//! End-to-end workflows driving the Git, CI and CD capabilities together.

mod attestation;
mod build;
mod pipelines;
pub mod promotion;

use std::sync::Arc;
use std::time::Duration;

use crate::providers::cd::ContinuousDelivery;
use crate::providers::ci::Ci;
use crate::providers::git::Git;
use crate::providers::sbom::SbomSearch;
use crate::retry::RetryOptions;

pub use attestation::{verify_sbom, SbomQuery};
pub use build::{run_source_build, BuildReport};
pub use pipelines::{drain_initial_pipelines, DrainOutcome};
pub use promotion::{promote_through_environments, PromotionReport};

/// Timeouts and retry budgets of the workflows.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSettings {
    /// Ceiling for a single pipeline to reach a terminal status
    pub pipeline_timeout: Duration,
    /// Budget for a triggered pipeline to become visible
    pub discovery_retry: RetryOptions,
    /// Budget for an image SBOM to be indexed
    pub sbom_retry: RetryOptions,
    /// Ceiling for draining the scaffolding pipelines
    pub drain_timeout: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            pipeline_timeout: Duration::from_secs(600),
            discovery_retry: RetryOptions::new(5, Duration::from_secs(10), Duration::from_secs(30)),
            sbom_retry: RetryOptions::new(10, Duration::from_secs(10), Duration::from_secs(60)),
            drain_timeout: Duration::from_secs(1200),
        }
    }
}

/// Everything one workflow execution talks to.
///
/// Built once per run; nothing in it outlives the run.
#[derive(Clone)]
pub struct WorkflowContext {
    pub git: Arc<dyn Git>,
    pub ci: Arc<dyn Ci>,
    pub cd: Arc<dyn ContinuousDelivery>,
    pub sbom: Option<Arc<dyn SbomSearch>>,
    pub settings: WorkflowSettings,
}
