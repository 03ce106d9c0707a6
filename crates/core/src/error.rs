//! Domain error model.

use thiserror::Error;

use crate::id::JobId;
use crate::job::JobStatus;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures only (malformed input, illegal transitions).
/// Storage and transport concerns live in [`JobError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A status transition that the job state machine does not allow.
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Job lifecycle error taxonomy.
///
/// - `DispatchFailed` propagates synchronously to whoever admitted the job.
/// - `WorkerLost` is resolved internally (job `Failed`, continuation failed).
/// - `UnknownJobId` is logged and dropped.
///
/// Duplicate or stale state-change events are not errors; the completion stage
/// reports them as an outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("dispatch failed for job {job_id}: {reason}")]
    DispatchFailed { job_id: JobId, reason: String },

    #[error("worker lost for job {job_id}: {reason}")]
    WorkerLost { job_id: JobId, reason: String },

    #[error("unknown job id: {0}")]
    UnknownJobId(JobId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl JobError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
