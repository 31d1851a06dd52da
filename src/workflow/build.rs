use log::info;
use serde::Serialize;

use crate::error::{HarnessError, Result};
use crate::model::{Environment, EventType, Pipeline, PullRequest};
use crate::providers::cd::SyncResult;

use super::pipelines::get_pipeline_and_wait_for_completion;
use super::promotion::{select_variant, PromotionVariant};
use super::WorkflowContext;

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub variant: PromotionVariant,
    /// Merged pull request, or the sample commit
    pub reference: PullRequest,
    /// In the order they ran
    pub pipelines: Vec<Pipeline>,
    pub gitops_revision: String,
    pub sync: SyncResult,
    /// Image development runs after the sync
    pub image: String,
}

/// Pushes a sample change through the source repository and waits until
/// development deploys the resulting GitOps revision.
pub async fn run_source_build(ctx: &WorkflowContext) -> Result<BuildReport> {
    let variant = select_variant(ctx.ci.ci_type());
    let ci = ctx.ci.as_ref();
    let mut pipelines = Vec::new();

    let reference = match variant {
        PromotionVariant::PullRequest => {
            let pull_request = ctx.git.create_sample_pull_request_on_source_repo().await?;
            pipelines.push(
                get_pipeline_and_wait_for_completion(
                    ci,
                    &pull_request,
                    EventType::PullRequest,
                    &ctx.settings,
                )
                .await?,
            );
            let merged = ctx.git.merge_pull_request(&pull_request).await?;
            info!("Merged {} as {}", pull_request.describe(), merged.sha);
            merged
        }
        PromotionVariant::DirectCommit => ctx.git.create_sample_commit_on_source_repo().await?,
    };

    pipelines.push(
        get_pipeline_and_wait_for_completion(ci, &reference, EventType::Push, &ctx.settings)
            .await?,
    );

    let environment = Environment::Development;
    let branch = ctx.git.repositories().default_branch.clone();
    let gitops_revision = ctx.git.get_gitops_repo_commit_sha(&branch).await?;

    ctx.cd.sync_application(environment).await?;
    let sync = ctx
        .cd
        .wait_until_application_is_synced(environment, &gitops_revision)
        .await;
    if !sync.synced {
        return Err(HarnessError::SyncFailed {
            application: ctx.cd.application_name(environment),
            status: sync.status,
            message: sync.message.unwrap_or_default(),
        });
    }

    let image = ctx.git.extract_application_image(environment).await?;
    info!("Development runs {image}");

    Ok(BuildReport {
        variant,
        reference,
        pipelines,
        gitops_revision,
        sync,
        image,
    })
}
