//! Transient inputs: job requests and worker state-change events.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{ContinuationToken, JobId};
use crate::job::{JobKind, JobStatus};

/// Whether the requester blocks on a continuation or fires and forgets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    Sync,
    Async,
}

/// Input selection for a job: explicit fastq ids, or fastq set ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPayload {
    #[serde(rename = "fastqIdList")]
    FastqIdList(Vec<String>),
    #[serde(rename = "fastqSetIdList")]
    FastqSetIdList(Vec<String>),
}

impl JobPayload {
    pub fn ids(&self) -> &[String] {
        match self {
            JobPayload::FastqIdList(ids) | JobPayload::FastqSetIdList(ids) => ids,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.ids().is_empty() {
            return Err(DomainError::validation("payload id list is empty"));
        }
        if self.ids().iter().any(|id| id.trim().is_empty()) {
            return Err(DomainError::validation("payload contains an empty id"));
        }
        Ok(())
    }
}

/// Worker tuning knobs carried through from the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// `-1` means all reads.
    #[serde(default = "JobOptions::all_reads")]
    pub max_reads: i64,
    #[serde(default)]
    pub sampling: bool,
    #[serde(default)]
    pub no_split_by_lane: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_uri_prefix: Option<String>,
}

impl JobOptions {
    fn all_reads() -> i64 {
        -1
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_reads: Self::all_reads(),
            sampling: false,
            no_split_by_lane: false,
            output_uri_prefix: None,
        }
    }
}

/// A classified request to run one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub payload: JobPayload,
    pub options: JobOptions,
    /// Present only for the synchronous flavor.
    pub continuation: Option<ContinuationToken>,
}

impl JobRequest {
    pub fn sync(kind: JobKind, payload: JobPayload, token: ContinuationToken) -> Self {
        Self {
            kind,
            payload,
            options: JobOptions::default(),
            continuation: Some(token),
        }
    }

    pub fn fire_and_forget(kind: JobKind, payload: JobPayload) -> Self {
        Self {
            kind,
            payload,
            options: JobOptions::default(),
            continuation: None,
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn flavor(&self) -> Flavor {
        match self.continuation {
            Some(_) => Flavor::Sync,
            None => Flavor::Async,
        }
    }
}

/// Worker-emitted (or internally emitted) status notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEvent {
    #[serde(rename = "id")]
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
}

impl StateChangeEvent {
    pub fn new(job_id: JobId, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            detail: None,
            output: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_output(mut self, output: JsonValue) -> Self {
        self.output = Some(output);
        self
    }
}
