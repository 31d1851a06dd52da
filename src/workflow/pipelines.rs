use log::{info, warn};
use serde::Serialize;

use crate::error::{HarnessError, Result};
use crate::model::{CancelPipelineOptions, CancelResult, EventType, Pipeline, PipelineStatus, PullRequest};
use crate::providers::ci::{Ci, InitialPipelinePolicy};
use crate::retry::{retry, Retryable};

use super::WorkflowSettings;

/// Finds the pipeline `reference` triggered and waits for it to succeed.
///
/// Discovery tolerates the pipeline not being visible yet and retries within
/// `settings.discovery_retry`. Any terminal status other than `Success`, or
/// a timeout, fails with [`HarnessError::PipelineFailed`] carrying the logs.
pub async fn get_pipeline_and_wait_for_completion(
    ci: &dyn Ci,
    reference: &PullRequest,
    event_type: EventType,
    settings: &WorkflowSettings,
) -> Result<Pipeline> {
    let operation = format!("Find {event_type} pipeline for {}", reference.describe());
    let mut pipeline = retry(&operation, &settings.discovery_retry, |_| async move {
        match ci
            .get_pipeline(reference, PipelineStatus::Unknown, Some(event_type))
            .await
        {
            Ok(Some(pipeline)) => Retryable::Success(pipeline),
            Ok(None) => Retryable::Continue(HarnessError::PipelineNotFound(reference.describe())),
            Err(e) => Retryable::from_result(Err(e)),
        }
    })
    .await?;

    info!(
        "Found pipeline {} ({}) for {}",
        pipeline.display_name(),
        pipeline.status,
        reference.describe()
    );

    let status = ci
        .wait_for_pipeline_to_finish(&mut pipeline, settings.pipeline_timeout)
        .await;
    if status == PipelineStatus::Success {
        info!("Pipeline {} succeeded", pipeline.display_name());
        return Ok(pipeline);
    }

    let logs = match ci.get_pipeline_logs(&pipeline).await {
        Ok(logs) => Some(logs),
        Err(e) => {
            warn!("Failed to fetch logs of pipeline {}: {e}", pipeline.display_name());
            None
        }
    };
    Err(HarnessError::PipelineFailed {
        id: pipeline.display_name(),
        status,
        logs,
    })
}

/// What happened to the pipelines started by scaffolding the component.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case", tag = "policy")]
pub enum DrainOutcome {
    Cancelled(CancelResult),
    Drained { idle: bool },
}

/// Applies the CI provider's initial-pipeline policy before a workflow
/// starts, so stale pipelines cannot be mistaken for the workflow's own.
pub async fn drain_initial_pipelines(ci: &dyn Ci, settings: &WorkflowSettings) -> DrainOutcome {
    match ci.ci_type().initial_pipeline_policy() {
        InitialPipelinePolicy::Cancel => {
            info!("Cancelling initial {} pipelines", ci.ci_type());
            let result = ci
                .cancel_all_pipelines(&CancelPipelineOptions::default())
                .await;
            if result.failed > 0 {
                warn!("{} initial pipelines could not be cancelled", result.failed);
            }
            DrainOutcome::Cancelled(result)
        }
        InitialPipelinePolicy::WaitForCompletion => {
            info!("Waiting for initial {} pipelines to finish", ci.ci_type());
            let idle = ci
                .wait_for_all_pipeline_runs_to_finish(settings.drain_timeout)
                .await;
            if !idle {
                warn!("Initial pipelines still running; continuing anyway");
            }
            DrainOutcome::Drained { idle }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ci::CiType;
    use crate::testing::FakeCi;

    fn running(id: &str) -> Pipeline {
        Pipeline::new(id, "checkout", "abc1234").with_status(PipelineStatus::Running)
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_appearing_late_is_found_within_budget() {
        let ci = FakeCi::new()
            .with_discoveries(vec![None, None, Some(running("42"))])
            .with_statuses(vec![PipelineStatus::Running, PipelineStatus::Success]);
        let reference = PullRequest::commit("abc1234", "checkout");

        let pipeline = get_pipeline_and_wait_for_completion(
            &ci,
            &reference,
            EventType::Push,
            &WorkflowSettings::default(),
        )
        .await
        .unwrap();

        assert_eq!(pipeline.id, "42");
        assert_eq!(pipeline.status, PipelineStatus::Success);
        assert_eq!(ci.discovery_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_never_appearing_exhausts_discovery_budget() {
        let ci = FakeCi::new().with_discoveries(vec![None]);
        let reference = PullRequest::commit("abc1234", "checkout");

        let err = get_pipeline_and_wait_for_completion(
            &ci,
            &reference,
            EventType::Push,
            &WorkflowSettings::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::RetriesExhausted { attempts: 6, .. }));
        assert_eq!(ci.discovery_calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pipeline_carries_logs() {
        let ci = FakeCi::new()
            .with_discoveries(vec![Some(running("7"))])
            .with_statuses(vec![PipelineStatus::Failure])
            .with_logs("step 3 failed");
        let reference = PullRequest::new(3, "abc1234", "checkout");

        let err = get_pipeline_and_wait_for_completion(
            &ci,
            &reference,
            EventType::PullRequest,
            &WorkflowSettings::default(),
        )
        .await
        .unwrap_err();

        match err {
            HarnessError::PipelineFailed { status, logs, .. } => {
                assert_eq!(status, PipelineStatus::Failure);
                assert_eq!(logs.as_deref(), Some("step 3 failed"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_timeout_fails_with_unknown() {
        let ci = FakeCi::new()
            .with_discoveries(vec![Some(running("7"))])
            .with_statuses(vec![PipelineStatus::Running]);
        let reference = PullRequest::commit("abc1234", "checkout");

        let err = get_pipeline_and_wait_for_completion(
            &ci,
            &reference,
            EventType::Push,
            &WorkflowSettings::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            HarnessError::PipelineFailed {
                status: PipelineStatus::Unknown,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_queue_providers_cancel_initial_pipelines() {
        let ci = FakeCi::new()
            .with_ci_type(CiType::Jenkins)
            .with_listing("checkout", vec![running("1"), running("2")]);

        let outcome = drain_initial_pipelines(&ci, &WorkflowSettings::default()).await;

        match outcome {
            DrainOutcome::Cancelled(result) => assert_eq!(result.cancelled, 2),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn other_providers_wait_for_initial_pipelines() {
        let ci = FakeCi::new()
            .with_ci_type(CiType::Tekton)
            .with_listing("checkout", vec![]);

        let outcome = drain_initial_pipelines(&ci, &WorkflowSettings::default()).await;

        assert!(matches!(outcome, DrainOutcome::Drained { idle: true }));
        assert!(ci.cancelled_ids().is_empty());
    }
}
