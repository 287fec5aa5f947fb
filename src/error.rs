use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::{JobStage, JobStatus};

/// Failure taxonomy shared by candidates and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retryable: network errors, timeouts, provider rate limits.
    TransientCollaborator,
    /// Not retried for this candidate within the current job run.
    PermanentCandidate,
    /// Aborts the whole job.
    JobFatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::TransientCollaborator => write!(f, "TransientCollaboratorError"),
            ErrorKind::PermanentCandidate => write!(f, "PermanentCandidateError"),
            ErrorKind::JobFatal => write!(f, "JobFatalError"),
        }
    }
}

/// Why a job was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalReason {
    MaxRetriesExceeded,
    FailureToleranceExceeded,
    SearchFailed,
    InvalidInput,
    Cancelled,
    Internal,
}

impl std::fmt::Display for FatalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalReason::MaxRetriesExceeded => write!(f, "max_retries_exceeded"),
            FatalReason::FailureToleranceExceeded => write!(f, "failure_tolerance_exceeded"),
            FatalReason::SearchFailed => write!(f, "search_failed"),
            FatalReason::InvalidInput => write!(f, "invalid_input"),
            FatalReason::Cancelled => write!(f, "cancelled"),
            FatalReason::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {0} is not complete (status: {1})")]
    JobNotComplete(Uuid, JobStatus),

    #[error("Job {0} is terminal and can no longer change")]
    JobTerminal(Uuid),

    #[error("Illegal stage transition {from} -> {to}")]
    InvalidTransition { from: JobStage, to: JobStage },

    #[error("Invalid job input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Task queue is closed")]
    QueueClosed,

    #[error("Task queue at capacity")]
    QueueFull,

    #[error("Lease not found or expired: {0}")]
    LeaseNotFound(Uuid),

    #[error("Job failed ({reason}): {detail}")]
    JobFatal { reason: FatalReason, detail: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ScoutError {
    pub fn fatal(reason: FatalReason, detail: impl Into<String>) -> Self {
        ScoutError::JobFatal {
            reason,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;
