//! Provider-agnostic half of pipeline discovery.
//!
//! Each CI binding fetches the runs that carry a commit SHA and hands them
//! over as [`RunCandidate`]s with statuses already mapped through its own
//! table. [`select_pipeline`] then applies the event filter, picks the most
//! recently updated run and checks it against the desired status.

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::model::{map_pipeline_status, EventType, Pipeline, PipelineStatus};

use super::{CiType, EventSupport};

/// A run reported by a provider for the SHA being looked up.
#[derive(Debug, Clone)]
pub struct RunCandidate {
    pub pipeline: Pipeline,
    pub updated_at: DateTime<Utc>,
}

/// Native status → canonical status word, one table per provider.
pub type StatusTable = &'static [(&'static str, &'static str)];

/// Maps a native status through `table` and the canonical policy.
///
/// Native values missing from the table are passed to the canonical mapping
/// unchanged, so anything unrecognised still ends up `Unknown`.
pub fn map_native_status(table: StatusTable, native: &str) -> PipelineStatus {
    let native = native.trim();
    let canonical = table
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(native))
        .map_or(native, |(_, canonical)| canonical);
    map_pipeline_status(canonical)
}

/// Whether a lookup with `event_type` makes sense for `ci_type`.
///
/// Providers that need the trigger to tell runs apart refuse lookups
/// without one instead of guessing.
pub fn event_type_accepted(ci_type: CiType, event_type: Option<EventType>) -> bool {
    if ci_type.event_support() == EventSupport::Required && event_type.is_none() {
        warn!("{ci_type} pipeline lookup needs an event type; none given");
        return false;
    }
    true
}

/// Picks the canonical pipeline for a SHA among `candidates`.
///
/// The latest `updated_at` wins; runs reported later win ties.
pub fn select_pipeline(
    ci_type: CiType,
    candidates: Vec<RunCandidate>,
    desired_status: PipelineStatus,
    event_type: Option<EventType>,
) -> Option<Pipeline> {
    if candidates.is_empty() || !event_type_accepted(ci_type, event_type) {
        return None;
    }

    let matching: Vec<RunCandidate> = match (ci_type.event_support(), event_type) {
        (EventSupport::Ignored, _) | (_, None) => candidates,
        (_, Some(wanted)) => candidates
            .into_iter()
            .filter(|c| c.pipeline.event_type.is_some_and(|t| wanted.matches(t)))
            .collect(),
    };

    let latest = matching.into_iter().max_by_key(|c| c.updated_at)?;
    let pipeline = latest.pipeline;

    if desired_status != PipelineStatus::Unknown && pipeline.status != desired_status {
        debug!(
            "Pipeline {} is {}, waiting for {desired_status}",
            pipeline.display_name(),
            pipeline.status
        );
        return None;
    }

    Some(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TABLE: StatusTable = &[("in_progress", "running"), ("failure", "failed")];

    fn candidate(id: &str, minute: u32, status: PipelineStatus, event: Option<EventType>) -> RunCandidate {
        let mut pipeline = Pipeline::new(id, "checkout", "abc1234").with_status(status);
        pipeline.event_type = event;
        RunCandidate {
            pipeline,
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn native_table_feeds_canonical_mapping() {
        assert_eq!(map_native_status(TABLE, "IN_PROGRESS"), PipelineStatus::Running);
        assert_eq!(map_native_status(TABLE, "failure"), PipelineStatus::Failure);
        assert_eq!(map_native_status(TABLE, "success"), PipelineStatus::Success);
        assert_eq!(map_native_status(TABLE, "exploded"), PipelineStatus::Unknown);
    }

    #[test]
    fn no_candidates_means_nothing_found() {
        assert!(select_pipeline(CiType::GitlabCi, vec![], PipelineStatus::Unknown, None).is_none());
    }

    #[test]
    fn latest_updated_run_wins() {
        let candidates = vec![
            candidate("1", 5, PipelineStatus::Failure, Some(EventType::Push)),
            candidate("2", 9, PipelineStatus::Running, Some(EventType::Push)),
            candidate("3", 7, PipelineStatus::Success, Some(EventType::Push)),
        ];
        let picked =
            select_pipeline(CiType::GitlabCi, candidates, PipelineStatus::Unknown, None).unwrap();
        assert_eq!(picked.id, "2");
    }

    #[test]
    fn event_filter_drops_other_triggers() {
        let candidates = vec![
            candidate("pr", 1, PipelineStatus::Running, Some(EventType::PullRequest)),
            candidate("push", 9, PipelineStatus::Running, Some(EventType::Push)),
        ];
        let picked = select_pipeline(
            CiType::GithubActions,
            candidates,
            PipelineStatus::Unknown,
            Some(EventType::PullRequest),
        )
        .unwrap();
        assert_eq!(picked.id, "pr");
    }

    #[test]
    fn event_filter_with_no_match_returns_none() {
        let candidates = vec![candidate("push", 9, PipelineStatus::Running, Some(EventType::Push))];
        assert!(select_pipeline(
            CiType::Tekton,
            candidates,
            PipelineStatus::Unknown,
            Some(EventType::PullRequest)
        )
        .is_none());
    }

    #[test]
    fn required_event_type_missing_returns_none() {
        let candidates = vec![candidate("1", 1, PipelineStatus::Running, Some(EventType::Push))];
        assert!(select_pipeline(CiType::Tekton, candidates, PipelineStatus::Unknown, None).is_none());
    }

    #[test]
    fn ignored_event_type_skips_filtering() {
        let candidates = vec![candidate("42", 1, PipelineStatus::Running, None)];
        let picked = select_pipeline(
            CiType::Jenkins,
            candidates,
            PipelineStatus::Unknown,
            Some(EventType::PullRequest),
        )
        .unwrap();
        assert_eq!(picked.id, "42");
    }

    #[test]
    fn desired_status_mismatch_returns_none() {
        let candidates = vec![candidate("1", 1, PipelineStatus::Running, Some(EventType::Push))];
        assert!(select_pipeline(
            CiType::GitlabCi,
            candidates.clone(),
            PipelineStatus::Success,
            None
        )
        .is_none());
        assert!(
            select_pipeline(CiType::GitlabCi, candidates, PipelineStatus::Running, None).is_some()
        );
    }

    #[test]
    fn selection_is_a_pure_query() {
        let candidates = vec![
            candidate("a", 1, PipelineStatus::Running, Some(EventType::Push)),
            candidate("b", 2, PipelineStatus::Running, Some(EventType::Push)),
        ];
        let first = select_pipeline(
            CiType::GitlabCi,
            candidates.clone(),
            PipelineStatus::Unknown,
            Some(EventType::Push),
        );
        let second = select_pipeline(
            CiType::GitlabCi,
            candidates,
            PipelineStatus::Unknown,
            Some(EventType::Push),
        );
        assert_eq!(first.map(|p| p.id), second.map(|p| p.id));
    }
}
