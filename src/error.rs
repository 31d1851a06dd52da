use thiserror::Error;

use crate::model::PipelineStatus;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("API request failed (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Provider-specific error code, when the response body carries one
        code: Option<String>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("No pipeline found yet for {0}")]
    PipelineNotFound(String),

    #[error("Pipeline {id} finished with status {status}")]
    PipelineFailed {
        id: String,
        status: PipelineStatus,
        logs: Option<String>,
    },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Application {application} did not sync: {status} - {message}")]
    SyncFailed {
        application: String,
        status: String,
        message: String,
    },

    #[error("No SBOM found for {0}")]
    SbomNotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl HarnessError {
    /// Whether the failure is transient infrastructure flakiness worth retrying.
    ///
    /// Connection problems, timeouts, rate limits and server errors are
    /// retryable. Not-found and other client errors are definitive.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_connect() || e.is_timeout() || e.is_body(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::PipelineNotFound(_) | Self::SbomNotFound(_) => true,
            _ => false,
        }
    }

    /// HTTP status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::NotFound(_) => Some(404),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            Self::RetriesExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// Provider error code carried by the error, if any.
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            Self::RetriesExhausted { source, .. } => source.provider_code(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
