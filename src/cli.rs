use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::model::{CancelPipelineOptions, Environment, EventType};
use crate::output::{self, PhaseProgress};
use crate::providers::build_context;
use crate::providers::sbom::SbomSummary;
use crate::workflow::{
    drain_initial_pipelines, promote_through_environments, run_source_build, verify_sbom,
    DrainOutcome, PromotionReport, SbomQuery, WorkflowContext,
};

#[derive(Parser)]
#[command(name = "promoctl")]
#[command(
    author,
    version,
    about = "End-to-end harness for build, GitOps promotion and attestation workflows",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; promoctl.{toml,json,yaml,yml} in the current directory by default
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write the JSON result to this file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Print the JSON result to stdout instead of the summary tables
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    #[command(flatten)]
    tokens: TokenArgs,
}

/// Credentials taking precedence over the configuration file.
#[derive(Args)]
struct TokenArgs {
    #[arg(long, global = true, env = "GIT_TOKEN", hide_env_values = true)]
    git_token: Option<String>,

    #[arg(long, global = true, env = "CI_TOKEN", hide_env_values = true)]
    ci_token: Option<String>,

    #[arg(long, global = true, env = "ARGOCD_TOKEN", hide_env_values = true)]
    argocd_token: Option<String>,

    #[arg(long, global = true, env = "TPA_TOKEN", hide_env_values = true)]
    tpa_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Push a sample change through the source repository and wait for development to deploy it
    Build {
        /// Do not drain the pipelines left by scaffolding first
        #[arg(long)]
        skip_drain: bool,
    },

    /// Promote the development image environment by environment
    Promote {
        #[arg(long, default_value = "prod")]
        to: Environment,

        /// Check that the promoted image has an indexed SBOM
        #[arg(long)]
        verify_sbom: bool,
    },

    /// Cancel the pipelines of the component's repositories
    CancelPipelines {
        /// Also cancel pipelines that already finished
        #[arg(long)]
        include_completed: bool,

        /// Skip pipelines whose name or branch matches this pattern
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Only cancel pipelines triggered by this event
        #[arg(long)]
        event: Option<EventType>,

        #[arg(short, long)]
        branch: Option<String>,

        /// Cancellations issued in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Wait until no pipeline of the component is running
    WaitPipelines {
        /// Seconds to wait before giving up
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Look up the SBOM of an image
    Sbom {
        /// Image reference, pinned by digest unless --document-id is given
        #[arg(short, long)]
        image: String,

        #[arg(long)]
        document_id: Option<String>,
    },
}

#[derive(Serialize)]
struct PromoteOutput<'a> {
    promotions: &'a [PromotionReport],
    sbom: Option<&'a SbomSummary>,
}

/// Runs `task` behind a phase spinner.
async fn phase<T, F>(step: usize, total: usize, description: &str, task: F) -> Result<T>
where
    F: Future<Output = crate::error::Result<T>>,
{
    let progress = PhaseProgress::start(step, total, description);
    match task.await {
        Ok(value) => {
            progress.finish();
            Ok(value)
        }
        Err(e) => {
            progress.fail();
            Err(e.into())
        }
    }
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        let tokens = &self.tokens;

        if let Some(token) = &tokens.git_token {
            config.git.token = Some(token.clone());
        }
        if let Some(token) = &tokens.ci_token {
            config.ci.token = Some(token.clone());
        }
        if let Some(token) = &tokens.argocd_token {
            config.cd.token = Some(token.clone());
        }
        if let (Some(token), Some(sbom)) = (&tokens.tpa_token, config.sbom.as_mut()) {
            sbom.token = Some(token.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Writes `value` as JSON to the output file, or to stdout in `--json` mode.
    ///
    /// Returns whether stdout was used, in which case no summary is printed.
    fn write_result<T: Serialize>(&self, value: &T) -> Result<bool> {
        let json_output = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, &json_output)?;
            info!("Result written to: {}", output_path.display());
        }
        if self.json {
            println!("{json_output}");
        }
        Ok(self.json)
    }

    async fn execute_build(&self, ctx: &WorkflowContext, skip_drain: bool) -> Result<()> {
        PhaseProgress::header();
        let total = if skip_drain { 1 } else { 2 };

        if !skip_drain {
            let progress = PhaseProgress::start(1, total, "Draining scaffolding pipelines");
            let outcome = drain_initial_pipelines(ctx.ci.as_ref(), &ctx.settings).await;
            progress.finish();
            if let DrainOutcome::Cancelled(result) = &outcome {
                info!(
                    "Cancelled {} of {} initial pipelines",
                    result.cancelled, result.total
                );
            }
        }

        let report = phase(total, total, "Building and deploying to development", run_source_build(ctx))
            .await?;
        eprintln!();

        if !self.write_result(&report)? {
            output::print_build_summary(&report);
        }
        Ok(())
    }

    async fn execute_promote(
        &self,
        ctx: &WorkflowContext,
        target: Environment,
        check_sbom: bool,
    ) -> Result<()> {
        PhaseProgress::header();
        let total = if check_sbom { 2 } else { 1 };

        let reports = phase(
            1,
            total,
            &format!("Promoting up to {target}"),
            promote_through_environments(ctx, target),
        )
        .await?;

        let sbom = match reports.last() {
            Some(last) if check_sbom => Some(
                phase(
                    2,
                    total,
                    "Verifying the SBOM",
                    verify_sbom(ctx, &SbomQuery::for_image(last.image.clone())),
                )
                .await?,
            ),
            _ => None,
        };
        eprintln!();

        let result = PromoteOutput {
            promotions: &reports,
            sbom: sbom.as_ref(),
        };
        if !self.write_result(&result)? {
            output::print_promotion_summary(&reports);
            if let (Some(sbom), Some(last)) = (&sbom, reports.last()) {
                output::print_sbom_summary(&last.image, sbom);
            }
        }
        Ok(())
    }

    async fn execute_cancel(
        &self,
        ctx: &WorkflowContext,
        defaults: CancelPipelineOptions,
        overrides: CancelPipelineOptions,
    ) -> Result<()> {
        let mut options = defaults;
        options.include_completed |= overrides.include_completed;
        options.exclude_patterns.extend(overrides.exclude_patterns);
        options.event_type = overrides.event_type.or(options.event_type);
        options.branch = overrides.branch.or(options.branch);
        options.dry_run |= overrides.dry_run;
        if overrides.concurrency > 0 {
            options.concurrency = overrides.concurrency;
        }

        info!(
            "Cancelling pipelines of {}{}",
            ctx.ci.repositories().join(", "),
            if options.dry_run { " (dry run)" } else { "" }
        );
        let result = ctx.ci.cancel_all_pipelines(&options).await;

        if !self.write_result(&result)? {
            output::print_cancel_summary(&result);
        }
        if result.failed > 0 {
            anyhow::bail!("{} pipelines could not be cancelled", result.failed);
        }
        Ok(())
    }

    async fn execute_wait(&self, ctx: &WorkflowContext, timeout: Option<u64>) -> Result<()> {
        let timeout = timeout.map_or(ctx.settings.drain_timeout, Duration::from_secs);
        let idle = ctx.ci.wait_for_all_pipeline_runs_to_finish(timeout).await;
        let outcome = DrainOutcome::Drained { idle };

        if !self.write_result(&outcome)? {
            output::print_drain_summary(&outcome);
        }
        if !idle {
            anyhow::bail!("pipelines still running after {}s", timeout.as_secs());
        }
        Ok(())
    }

    async fn execute_sbom(&self, ctx: &WorkflowContext, query: SbomQuery) -> Result<()> {
        let sbom = verify_sbom(ctx, &query).await?;
        if !self.write_result(&sbom)? {
            output::print_sbom_summary(&query.image, &sbom);
        }
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = self.load_config()?;
        let ctx = build_context(&config)?;

        match &self.command {
            Commands::Build { skip_drain } => self.execute_build(&ctx, *skip_drain).await,
            Commands::Promote { to, verify_sbom } => {
                self.execute_promote(&ctx, *to, *verify_sbom).await
            }
            Commands::CancelPipelines {
                include_completed,
                exclude,
                event,
                branch,
                concurrency,
                dry_run,
            } => {
                let overrides = CancelPipelineOptions {
                    include_completed: *include_completed,
                    exclude_patterns: exclude.clone(),
                    event_type: *event,
                    branch: branch.clone(),
                    concurrency: concurrency.unwrap_or(0),
                    dry_run: *dry_run,
                };
                self.execute_cancel(&ctx, config.cancel.clone(), overrides)
                    .await
            }
            Commands::WaitPipelines { timeout } => self.execute_wait(&ctx, *timeout).await,
            Commands::Sbom { image, document_id } => {
                let query = SbomQuery {
                    image: image.clone(),
                    document_id: document_id.clone(),
                };
                self.execute_sbom(&ctx, query).await
            }
        }
    }
}
