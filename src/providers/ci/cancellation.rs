use futures::future::join_all;
use log::{error, info, warn};
use regex::Regex;

use crate::error::HarnessError;
use crate::model::{
    CancelDetail, CancelError, CancelErrorKind, CancelOutcome, CancelPipelineOptions, CancelResult,
    Pipeline,
};

use super::Ci;

/// Cancels every matching pipeline of `repositories`.
///
/// Pipelines are fetched from every repository, filtered, then cancelled in
/// batches of `options.concurrency`. Requests inside a batch run together
/// and one failure never aborts its siblings. Every fetched pipeline ends up
/// in exactly one of `cancelled`, `failed` or `skipped`.
pub async fn cancel_all_pipelines<C>(
    ci: &C,
    repositories: &[String],
    options: &CancelPipelineOptions,
) -> CancelResult
where
    C: Ci + ?Sized,
{
    let mut result = CancelResult::default();

    let mut pipelines = Vec::new();
    for repository in repositories {
        match ci.list_pipelines(repository).await {
            Ok(found) => {
                info!("Found {} pipelines in {repository}", found.len());
                pipelines.extend(found);
            }
            Err(e) => warn!("Failed to list pipelines of {repository}, treating as none: {e}"),
        }
    }
    result.total = pipelines.len();

    let filter = PipelineFilter::new(options);
    let mut targets = Vec::new();
    for pipeline in pipelines {
        match filter.skip_reason(&pipeline) {
            Some(reason) => result.record(detail(&pipeline, CancelOutcome::Skipped, Some(reason))),
            None => targets.push(pipeline),
        }
    }

    if options.dry_run {
        for pipeline in &targets {
            info!("[dry run] Would cancel pipeline {}", pipeline.display_name());
            result.record(detail(
                pipeline,
                CancelOutcome::Skipped,
                Some("dry run".to_string()),
            ));
        }
    } else {
        for batch in targets.chunks(options.concurrency.max(1)) {
            cancel_batch(ci, batch, &mut result).await;
        }
    }

    result.check_accounting();
    for e in result.accounting_errors() {
        error!("{}", e.message);
    }

    info!(
        "Cancellation finished: {} cancelled, {} failed, {} skipped of {}",
        result.cancelled, result.failed, result.skipped, result.total
    );
    result
}

async fn cancel_batch<C>(ci: &C, batch: &[Pipeline], result: &mut CancelResult)
where
    C: Ci + ?Sized,
{
    let outcomes = join_all(batch.iter().map(|pipeline| async move {
        (pipeline, ci.cancel_pipeline(pipeline).await)
    }))
    .await;

    let mut failures = 0;
    for (pipeline, outcome) in outcomes {
        match outcome {
            Ok(()) => {
                info!("Cancelled pipeline {}", pipeline.display_name());
                result.record(detail(pipeline, CancelOutcome::Cancelled, None));
            }
            Err(e) => {
                failures += 1;
                warn!("Failed to cancel pipeline {}: {e}", pipeline.display_name());
                result.errors.push(provider_error(pipeline, &e));
                result.record(detail(pipeline, CancelOutcome::Failed, Some(e.to_string())));
            }
        }
    }

    if failures > 0 && failures == batch.len() {
        error!(
            "All {failures} cancellations in batch failed; suspect an authentication or network problem"
        );
    }
}

fn detail(pipeline: &Pipeline, outcome: CancelOutcome, reason: Option<String>) -> CancelDetail {
    CancelDetail {
        pipeline_id: pipeline.id.clone(),
        name: pipeline.name.clone(),
        repository: pipeline.repository.clone(),
        branch: pipeline.branch.clone(),
        outcome,
        reason,
    }
}

fn provider_error(pipeline: &Pipeline, e: &HarnessError) -> CancelError {
    CancelError {
        kind: CancelErrorKind::Provider,
        pipeline_id: Some(pipeline.id.clone()),
        message: e.to_string(),
        status_code: e.status_code(),
        provider_code: e.provider_code().map(str::to_string),
    }
}

/// The filters of [`CancelPipelineOptions`], applied in a fixed order.
struct PipelineFilter<'a> {
    options: &'a CancelPipelineOptions,
    excludes: Vec<Regex>,
}

impl<'a> PipelineFilter<'a> {
    fn new(options: &'a CancelPipelineOptions) -> Self {
        let excludes = options
            .exclude_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Invalid exclude pattern '{pattern}' ({e}), matching it literally");
                    Regex::new(&regex::escape(pattern)).ok()
                }
            })
            .collect();
        Self { options, excludes }
    }

    fn skip_reason(&self, pipeline: &Pipeline) -> Option<String> {
        if !self.options.include_completed && pipeline.is_terminal() {
            return Some(format!("already completed ({})", pipeline.status));
        }

        let name = pipeline.name.as_deref().unwrap_or_default();
        let branch = pipeline.branch.as_deref().unwrap_or_default();
        if let Some(re) = self
            .excludes
            .iter()
            .find(|re| re.is_match(name) || re.is_match(branch))
        {
            return Some(format!("matches exclude pattern '{}'", re.as_str()));
        }

        if let Some(wanted) = self.options.event_type {
            if !pipeline.event_type.is_some_and(|t| wanted.matches(t)) {
                return Some(format!("not triggered by {wanted}"));
            }
        }

        if let Some(wanted) = &self.options.branch {
            if pipeline.branch.as_deref() != Some(wanted.as_str()) {
                return Some(format!("not on branch {wanted}"));
            }
        }

        None
    }
}
