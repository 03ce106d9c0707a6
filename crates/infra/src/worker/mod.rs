//! Worker invocation and execution-status queries.
//!
//! The worker is an external execution unit. The orchestrator only launches it
//! (fire-and-forget) and later asks, by execution handle, whether it is still
//! alive. Results come back as state-change events on the bus, never from here.

pub mod memory;
pub mod process;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fqdecomp_core::{ExecutionHandle, JobId, JobKind, JobPayload, JobRecord};

use crate::layout::ObjectLayout;

pub use memory::InMemoryWorkerLauncher;
pub use process::ProcessWorkerLauncher;

/// Descriptor handed to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerJob {
    pub job_id: JobId,
    #[serde(rename = "jobType")]
    pub kind: JobKind,
    #[serde(flatten)]
    pub payload: JobPayload,
    pub max_reads: i64,
    pub sampling: bool,
    pub no_split_by_lane: bool,
    pub output_uri_prefix: String,
    pub s3_job_metadata_bucket: String,
    pub s3_job_metadata_prefix: String,
}

impl WorkerJob {
    pub fn for_record(record: &JobRecord, layout: &ObjectLayout) -> Self {
        Self {
            job_id: record.id,
            kind: record.kind,
            payload: record.payload.clone(),
            max_reads: record.options.max_reads,
            sampling: record.options.sampling,
            no_split_by_lane: record.options.no_split_by_lane,
            output_uri_prefix: record.output_uri_prefix.clone(),
            s3_job_metadata_bucket: layout.bucket.clone(),
            s3_job_metadata_prefix: layout.metadata_key_prefix(record.id, record.created_at),
        }
    }
}

/// What the execution substrate knows about one worker run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Exited { success: bool },
    /// The substrate has no record of this execution.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("failed to start worker: {0}")]
    Spawn(String),
    #[error("failed to query worker {handle}: {reason}")]
    Query {
        handle: ExecutionHandle,
        reason: String,
    },
}

pub trait WorkerLauncher: Send + Sync {
    /// Start the worker. Returns as soon as it is running.
    fn launch(&self, job: &WorkerJob) -> Result<ExecutionHandle, LaunchError>;

    /// Out-of-band liveness check by execution handle.
    fn status(&self, handle: &ExecutionHandle) -> Result<WorkerState, LaunchError>;

    /// The job is settled; drop whatever is kept for this execution.
    fn release(&self, handle: &ExecutionHandle);
}
