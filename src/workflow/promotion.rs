use log::info;
use serde::Serialize;

use crate::error::{HarnessError, Result};
use crate::model::{Environment, EventType, Pipeline, PullRequest};
use crate::providers::cd::SyncResult;
use crate::providers::ci::CiType;

use super::pipelines::get_pipeline_and_wait_for_completion;
use super::WorkflowContext;

/// How a change reaches the GitOps repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromotionVariant {
    /// Pull request, PR pipeline, merge
    PullRequest,
    /// Commit straight to the default branch, push pipeline
    DirectCommit,
}

impl PromotionVariant {
    pub fn event_type(self) -> EventType {
        match self {
            Self::PullRequest => EventType::PullRequest,
            Self::DirectCommit => EventType::Push,
        }
    }
}

/// CI systems that cannot run pull request pipelines get direct commits.
pub fn select_variant(ci_type: CiType) -> PromotionVariant {
    if ci_type.supports_pull_request_triggers() {
        PromotionVariant::PullRequest
    } else {
        PromotionVariant::DirectCommit
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub environment: Environment,
    pub variant: PromotionVariant,
    pub image: String,
    /// Merged pull request, or the promotion commit
    pub reference: PullRequest,
    pub pipeline: Pipeline,
    pub sync: SyncResult,
}

/// Promotes `image` into `environment` and waits until it is deployed.
///
/// The CD application for `environment` must already exist. The change goes
/// through a pull request or a direct commit depending on the CI provider;
/// either way its pipeline must succeed and the application must sync to
/// the resulting GitOps revision.
pub async fn handle_promotion_to_environment(
    ctx: &WorkflowContext,
    environment: Environment,
    image: &str,
) -> Result<PromotionReport> {
    let application = ctx.cd.application_name(environment);
    if ctx.cd.get_application(environment).await?.is_none() {
        return Err(HarnessError::Precondition(format!(
            "CD application {application} for {environment} does not exist"
        )));
    }

    let variant = select_variant(ctx.ci.ci_type());
    info!("Promoting {image} to {environment} ({variant:?})");

    let (reference, pipeline) = match variant {
        PromotionVariant::PullRequest => {
            let pull_request = ctx
                .git
                .create_promotion_pull_request_on_gitops_repo(environment, image)
                .await?;
            let pipeline = get_pipeline_and_wait_for_completion(
                ctx.ci.as_ref(),
                &pull_request,
                variant.event_type(),
                &ctx.settings,
            )
            .await?;
            let merged = ctx.git.merge_pull_request(&pull_request).await?;
            info!("Merged {} as {}", pull_request.describe(), merged.sha);
            (merged, pipeline)
        }
        PromotionVariant::DirectCommit => {
            let sha = ctx
                .git
                .create_promotion_commit_on_gitops_repo(environment, image)
                .await?;
            let commit = PullRequest::commit(sha, &ctx.git.repositories().gitops);
            let pipeline = get_pipeline_and_wait_for_completion(
                ctx.ci.as_ref(),
                &commit,
                variant.event_type(),
                &ctx.settings,
            )
            .await?;
            (commit, pipeline)
        }
    };

    ctx.cd.sync_application(environment).await?;
    let sync = ctx
        .cd
        .wait_until_application_is_synced(environment, &reference.sha)
        .await;
    if !sync.synced {
        return Err(HarnessError::SyncFailed {
            application,
            status: sync.status,
            message: sync.message.unwrap_or_default(),
        });
    }

    info!("{image} is live in {environment}");
    Ok(PromotionReport {
        environment,
        variant,
        image: image.to_string(),
        reference,
        pipeline,
        sync,
    })
}

/// Promotes environment by environment up to `target`.
///
/// Each step promotes the image the previous environment currently runs, and
/// only starts once the previous step synced.
pub async fn promote_through_environments(
    ctx: &WorkflowContext,
    target: Environment,
) -> Result<Vec<PromotionReport>> {
    if target == Environment::Development {
        return Err(HarnessError::Precondition(
            "development is deployed by builds, not promotions".to_string(),
        ));
    }

    let mut reports = Vec::new();
    for environment in Environment::CHAIN {
        let Some(source) = environment.previous() else {
            continue;
        };
        if environment > target {
            break;
        }
        let image = ctx.git.extract_application_image(source).await?;
        reports.push(handle_promotion_to_environment(ctx, environment, &image).await?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, FakeCd, FakeCi, FakeGit};
    use crate::model::PipelineStatus;

    const DEV_IMAGE: &str = "quay.io/acme/checkout@sha256:aaaa";

    fn pipeline(id: &str) -> Pipeline {
        Pipeline::new(id, "checkout-gitops", "x").with_status(PipelineStatus::Running)
    }

    fn ci_for(ci_type: CiType) -> FakeCi {
        FakeCi::new()
            .with_ci_type(ci_type)
            .with_discoveries(vec![Some(pipeline("p1"))])
            .with_statuses(vec![PipelineStatus::Success])
    }

    #[test]
    fn variant_follows_pull_request_support() {
        for ci_type in CiType::ALL {
            let expected = if ci_type == CiType::Jenkins {
                PromotionVariant::DirectCommit
            } else {
                PromotionVariant::PullRequest
            };
            assert_eq!(select_variant(ci_type), expected, "{ci_type}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pull_request_promotion_syncs_at_merge_commit() {
        let git = FakeGit::new().with_image(Environment::Stage, "quay.io/acme/checkout@sha256:old");
        let cd = FakeCd::new().synced_at_latest_request();
        let ctx = context(git.clone(), ci_for(CiType::GitlabCi), cd.clone());

        let report = handle_promotion_to_environment(&ctx, Environment::Stage, DEV_IMAGE)
            .await
            .unwrap();

        assert_eq!(report.variant, PromotionVariant::PullRequest);
        assert!(report.reference.merged);
        assert_eq!(git.opened_pull_requests(), 1);
        assert_eq!(git.merged_pull_requests(), 1);
        assert_eq!(cd.awaited_revisions(), vec![report.reference.sha.clone()]);
        assert_eq!(git.image(Environment::Stage).as_deref(), Some(DEV_IMAGE));
        assert!(report.sync.synced);
    }

    #[tokio::test(start_paused = true)]
    async fn jenkins_promotion_commits_directly() {
        let git = FakeGit::new().with_image(Environment::Stage, "quay.io/acme/checkout@sha256:old");
        let ci = ci_for(CiType::Jenkins);
        let cd = FakeCd::new().synced_at_latest_request();
        let ctx = context(git.clone(), ci.clone(), cd);

        let report = handle_promotion_to_environment(&ctx, Environment::Stage, DEV_IMAGE)
            .await
            .unwrap();

        assert_eq!(report.variant, PromotionVariant::DirectCommit);
        assert!(report.reference.is_commit());
        assert_eq!(git.opened_pull_requests(), 0);
        assert_eq!(git.merged_pull_requests(), 0);
        assert_eq!(ci.discovery_events(), vec![Some(EventType::Push)]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_application_is_a_precondition_failure() {
        let git = FakeGit::new().with_image(Environment::Prod, "quay.io/acme/checkout@sha256:old");
        let cd = FakeCd::new().without_application(Environment::Prod);
        let ctx = context(git.clone(), ci_for(CiType::GitlabCi), cd);

        let err = handle_promotion_to_environment(&ctx, Environment::Prod, DEV_IMAGE)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Precondition(_)));
        assert_eq!(git.opened_pull_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unsynced_application_fails_promotion() {
        let git = FakeGit::new().with_image(Environment::Stage, "quay.io/acme/checkout@sha256:old");
        let cd = FakeCd::new();
        let ctx = context(git, ci_for(CiType::GithubActions), cd);

        let err = handle_promotion_to_environment(&ctx, Environment::Stage, DEV_IMAGE)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::SyncFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pipeline_stops_before_merge() {
        let git = FakeGit::new().with_image(Environment::Stage, "quay.io/acme/checkout@sha256:old");
        let ci = FakeCi::new()
            .with_discoveries(vec![Some(pipeline("p1"))])
            .with_statuses(vec![PipelineStatus::Failure]);
        let ctx = context(git.clone(), ci, FakeCd::new().synced_at_latest_request());

        let err = handle_promotion_to_environment(&ctx, Environment::Stage, DEV_IMAGE)
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::PipelineFailed { .. }));
        assert_eq!(git.merged_pull_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn promotes_through_stage_to_prod() {
        let git = FakeGit::new()
            .with_image(Environment::Development, DEV_IMAGE)
            .with_image(Environment::Stage, "quay.io/acme/checkout@sha256:old-stage")
            .with_image(Environment::Prod, "quay.io/acme/checkout@sha256:old-prod");
        let ctx = context(
            git.clone(),
            ci_for(CiType::GitlabCi),
            FakeCd::new().synced_at_latest_request(),
        );

        let reports = promote_through_environments(&ctx, Environment::Prod)
            .await
            .unwrap();

        let environments: Vec<_> = reports.iter().map(|r| r.environment).collect();
        assert_eq!(environments, vec![Environment::Stage, Environment::Prod]);
        assert_eq!(git.image(Environment::Prod).as_deref(), Some(DEV_IMAGE));
    }

    #[tokio::test(start_paused = true)]
    async fn promoting_to_development_is_rejected() {
        let ctx = context(FakeGit::new(), FakeCi::new(), FakeCd::new());
        let err = promote_through_environments(&ctx, Environment::Development)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Precondition(_)));
    }
}
