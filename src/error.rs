use crate::models::Artifact;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Remote(String),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("all items are skipped")]
    AllItemsSkipped,
    #[error("job submission returned no task id")]
    NoJobId,
    #[error("expected {expected} processed artifacts, got {actual}")]
    Misaligned { expected: usize, actual: usize },
    #[error("index {index} out of range for {len} items")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("{0} already in progress")]
    Busy(&'static str),
    #[error("session not found")]
    SessionNotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudioErrorKind {
    InvalidInput,
    Conflict,
    NotFound,
    Upstream,
    Internal,
}

impl StudioError {
    pub fn kind(&self) -> StudioErrorKind {
        match self {
            StudioError::AllItemsSkipped
            | StudioError::Misaligned { .. }
            | StudioError::IndexOutOfRange { .. }
            | StudioError::InvalidInput(_) => StudioErrorKind::InvalidInput,
            StudioError::Busy(_) => StudioErrorKind::Conflict,
            StudioError::SessionNotFound => StudioErrorKind::NotFound,
            StudioError::Transport(_)
            | StudioError::Status { .. }
            | StudioError::InvalidResponse(_)
            | StudioError::Remote(_)
            | StudioError::NoJobId
            | StudioError::Job(_) => StudioErrorKind::Upstream,
            StudioError::Internal(_) => StudioErrorKind::Internal,
        }
    }

    /// Stable short code used as the `error` field of API responses.
    pub fn code(&self) -> &'static str {
        match self {
            StudioError::Transport(_) => "transport",
            StudioError::Status { .. } => "upstream_status",
            StudioError::InvalidResponse(_) => "invalid_response",
            StudioError::Remote(_) => "remote",
            StudioError::Job(err) => match err.kind {
                JobErrorKind::Failed => "job_failed",
                JobErrorKind::Transport => "job_transport",
                JobErrorKind::Abandoned => "job_abandoned",
            },
            StudioError::AllItemsSkipped => "all_items_skipped",
            StudioError::NoJobId => "no_job_id",
            StudioError::Misaligned { .. } => "misaligned",
            StudioError::IndexOutOfRange { .. } => "index_out_of_range",
            StudioError::Busy(_) => "busy",
            StudioError::SessionNotFound => "not_found",
            StudioError::InvalidInput(_) => "invalid_input",
            StudioError::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    Failed,
    Transport,
    Abandoned,
}

/// Terminal failure of a generation job. Whatever artifacts were produced
/// before the failure travel with the error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    pub partial: Vec<Artifact>,
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> StudioError {
    if err.is_decode() {
        return StudioError::InvalidResponse(err.to_string());
    }
    StudioError::Transport(err.to_string())
}
