//! Job kinds, the status state machine and the persisted job record.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{ExecutionHandle, JobId};
use crate::request::{JobOptions, JobPayload};

/// The four supported work types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "ORA_DECOMPRESSION")]
    OraDecompression,
    #[serde(rename = "GZIP_FILESIZE_CALCULATION")]
    GzipFileSizeCalculation,
    #[serde(rename = "RAW_MD5SUM_CALCULATION")]
    RawMd5sumCalculation,
    #[serde(rename = "READ_COUNT_CALCULATION")]
    ReadCountCalculation,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::OraDecompression,
        JobKind::GzipFileSizeCalculation,
        JobKind::RawMd5sumCalculation,
        JobKind::ReadCountCalculation,
    ];

    /// Discriminator value used on the wire and handed to the worker.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::OraDecompression => "ORA_DECOMPRESSION",
            JobKind::GzipFileSizeCalculation => "GZIP_FILESIZE_CALCULATION",
            JobKind::RawMd5sumCalculation => "RAW_MD5SUM_CALCULATION",
            JobKind::ReadCountCalculation => "READ_COUNT_CALCULATION",
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job kind '{s}'")))
    }
}

/// Job lifecycle status.
///
/// `Dispatched -> Running -> Succeeded | Failed`, with `Failed` reachable from
/// any non-terminal state. Terminal states accept no further transitions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[serde(alias = "PENDING")]
    Dispatched,
    Running,
    Succeeded,
    #[serde(alias = "ABORTED")]
    Failed,
}

impl JobStatus {
    pub const IN_FLIGHT: [JobStatus; 2] = [JobStatus::Dispatched, JobStatus::Running];

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Dispatched, JobStatus::Running)
                | (JobStatus::Dispatched, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Dispatched => "DISPATCHED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    /// Accepts the worker's vocabulary: `PENDING` is a dispatched job and
    /// `ABORTED` is a failure.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" | "DISPATCHED" => Ok(JobStatus::Dispatched),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" | "ABORTED" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status '{other}'"))),
        }
    }
}

/// Persisted job record (one per job id, never deleted by the orchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: JobPayload,
    pub options: JobOptions,
    /// Set once the worker has been launched.
    pub execution_handle: Option<ExecutionHandle>,
    pub output_uri_prefix: String,
    /// Where the worker writes result metadata; handed back as the success result.
    pub metadata_uri: String,
    /// Failure reason; also set on a `Dispatched` record whose worker never launched.
    pub error_message: Option<String>,
    pub output: Option<JsonValue>,
    /// First time a sweep saw the worker gone without a terminal event.
    #[serde(default)]
    pub worker_exited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Retention is owned by the storage layer; this is the expiry attribute it reads.
    pub expires_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        kind: JobKind,
        payload: JobPayload,
        options: JobOptions,
        output_uri_prefix: impl Into<String>,
        metadata_uri: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            status: JobStatus::Dispatched,
            payload,
            options,
            execution_handle: None,
            output_uri_prefix: output_uri_prefix.into(),
            metadata_uri: metadata_uri.into(),
            error_message: None,
            output: None,
            worker_exited_at: None,
            created_at: now,
            updated_at: now,
            expires_at: expiry(now, ttl),
        }
    }

    /// Apply a status transition, rejecting edges the state machine forbids.
    pub fn transition(&mut self, next: JobStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `Failed` with a reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Move to `Succeeded`, keeping any output the worker reported.
    pub fn mark_succeeded(&mut self, output: Option<JsonValue>) -> DomainResult<()> {
        self.transition(JobStatus::Succeeded)?;
        self.output = output;
        Ok(())
    }

    /// Whether the record was created more than `age` ago.
    pub fn is_older_than(&self, age: Duration, now: DateTime<Utc>) -> bool {
        elapsed(self.created_at, age, now)
    }

    /// Whether the worker was first seen gone more than `grace` ago.
    pub fn exit_grace_elapsed(&self, grace: Duration, now: DateTime<Utc>) -> bool {
        self.worker_exited_at
            .is_some_and(|seen| elapsed(seen, grace, now))
    }
}

/// `now + ttl`, saturating at the latest representable instant.
pub fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A span too large to represent never elapses.
fn elapsed(since: DateTime<Utc>, span: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(span) {
        Ok(span) => now.signed_duration_since(since) > span,
        Err(_) => false,
    }
}
