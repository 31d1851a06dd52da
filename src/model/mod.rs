mod cancel;
mod environment;
mod pipeline;
mod poll;
mod pull_request;

pub use cancel::{
    CancelDetail, CancelError, CancelErrorKind, CancelOutcome, CancelPipelineOptions, CancelResult,
};
pub use environment::Environment;
pub use pipeline::{map_pipeline_status, EventType, Pipeline, PipelineStatus};
pub use poll::PollSettings;
pub use pull_request::{same_revision, short_sha, PullRequest};
