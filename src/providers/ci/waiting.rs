use log::{debug, info, warn};
use tokio::time::{sleep, Instant};

use crate::model::{Pipeline, PipelineStatus, PollSettings};

use super::Ci;

/// Polls `pipeline` until it reaches a terminal status or the timeout elapses.
///
/// `pipeline` is owned by the caller for the duration of the wait; this loop
/// is its only writer. A failing status poll is logged and the loop keeps
/// going. Timing out returns `Unknown` and leaves the last observed status
/// on the pipeline.
pub async fn wait_for_pipeline<C>(ci: &C, pipeline: &mut Pipeline, poll: PollSettings) -> PipelineStatus
where
    C: Ci + ?Sized,
{
    let started = Instant::now();

    while !pipeline.is_terminal() && started.elapsed() < poll.timeout {
        sleep(poll.interval).await;

        match ci.check_pipeline_status(pipeline).await {
            Ok(status) if status != pipeline.status => {
                info!(
                    "Pipeline {} moved from {} to {status}",
                    pipeline.display_name(),
                    pipeline.status
                );
                pipeline.status = status;
            }
            Ok(_) => debug!(
                "Pipeline {} still {} after {}s",
                pipeline.display_name(),
                pipeline.status,
                started.elapsed().as_secs()
            ),
            Err(e) => warn!(
                "Failed to check status of pipeline {}: {e}",
                pipeline.display_name()
            ),
        }
    }

    if pipeline.is_terminal() {
        return pipeline.status;
    }

    warn!(
        "Timed out after {}s waiting for pipeline {} (last status {})",
        poll.timeout.as_secs(),
        pipeline.display_name(),
        pipeline.status
    );
    PipelineStatus::Unknown
}

/// Waits until none of `repositories` has an active pipeline.
///
/// A repository that cannot be listed counts as having none. Returns `false`
/// when the timeout elapsed with pipelines still running.
pub async fn wait_for_all_pipelines<C>(ci: &C, repositories: &[String], poll: PollSettings) -> bool
where
    C: Ci + ?Sized,
{
    let started = Instant::now();

    loop {
        let mut active = 0;
        for repository in repositories {
            match ci.list_pipelines(repository).await {
                Ok(pipelines) => active += pipelines.iter().filter(|p| !p.is_terminal()).count(),
                Err(e) => warn!("Failed to list pipelines of {repository}: {e}"),
            }
        }

        if active == 0 {
            info!("No active pipelines left");
            return true;
        }

        if started.elapsed() >= poll.timeout {
            warn!(
                "{active} pipelines still active after {}s",
                poll.timeout.as_secs()
            );
            return false;
        }

        debug!("Waiting for {active} active pipelines");
        sleep(poll.interval).await;
    }
}
