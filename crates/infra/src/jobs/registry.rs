//! Job registry: durable job records, queryable by status.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use serde_json::Value as JsonValue;

use fqdecomp_core::{ExecutionHandle, JobId, JobRecord, JobStatus};

use crate::error::StoreError;

/// Optional fields written together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub error_message: Option<String>,
    pub output: Option<JsonValue>,
}

impl RecordPatch {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            output: None,
        }
    }

    pub fn output(output: Option<JsonValue>) -> Self {
        Self {
            error_message: None,
            output,
        }
    }
}

/// Outcome of a conditional status transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The record moved to the requested status; the updated record is returned.
    Applied(JobRecord),
    /// The current status does not allow the move; nothing was written.
    Rejected { current: JobStatus },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// Job registry abstraction.
///
/// Every mutation is a single conditional write: concurrent stages race on the
/// same record and the loser observes `Transition::Rejected`, never a lost update.
pub trait JobRegistry: Send + Sync {
    /// Insert a new record. Fails if the id is already present.
    fn insert(&self, record: JobRecord) -> Result<(), StoreError>;

    /// Get a record by id.
    fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Records whose status is one of `statuses`, oldest first.
    fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<JobRecord>, StoreError>;

    /// Move a record to `next` if the state machine allows it from its current status.
    fn transition(
        &self,
        job_id: JobId,
        next: JobStatus,
        patch: RecordPatch,
    ) -> Result<Transition, StoreError>;

    /// Record the worker execution handle for a job.
    fn set_execution_handle(
        &self,
        job_id: JobId,
        handle: ExecutionHandle,
    ) -> Result<(), StoreError>;

    /// Note that the job's worker could not be launched. The status is left alone;
    /// the next sweep fails the job with `reason`.
    fn record_launch_failure(&self, job_id: JobId, reason: &str) -> Result<(), StoreError>;

    /// Stamp the first time the worker was seen gone. Later calls keep the first
    /// stamp. Returns the record as stored.
    fn note_worker_exit(
        &self,
        job_id: JobId,
        seen_at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError>;
}

/// In-memory registry with a status index, for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobRegistry {
    inner: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<JobId, JobRecord>,
    by_status: HashMap<JobStatus, Vec<JobId>>,
}

impl Tables {
    fn index(&mut self, id: JobId, status: JobStatus) {
        self.by_status.entry(status).or_default().push(id);
    }

    fn unindex(&mut self, id: JobId, status: JobStatus) {
        if let Some(ids) = self.by_status.get_mut(&status) {
            ids.retain(|i| *i != id);
        }
    }
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobRegistry for InMemoryJobRegistry {
    fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut tables = self.inner.write().map_err(|_| StoreError::poisoned())?;
        if tables.jobs.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.to_string()));
        }
        tables.index(record.id, record.status);
        tables.jobs.insert(record.id, record);
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let tables = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(tables.jobs.get(&job_id).cloned())
    }

    fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<JobRecord>, StoreError> {
        let tables = self.inner.read().map_err(|_| StoreError::poisoned())?;
        let mut result: Vec<_> = statuses
            .iter()
            .filter_map(|s| tables.by_status.get(s))
            .flatten()
            .filter_map(|id| tables.jobs.get(id))
            .cloned()
            .collect();

        result.sort_by_key(|j| j.created_at);
        Ok(result)
    }

    fn transition(
        &self,
        job_id: JobId,
        next: JobStatus,
        patch: RecordPatch,
    ) -> Result<Transition, StoreError> {
        let mut tables = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let record = tables
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;

        let previous = record.status;
        if record.transition(next).is_err() {
            return Ok(Transition::Rejected { current: previous });
        }
        if patch.error_message.is_some() {
            record.error_message = patch.error_message;
        }
        if patch.output.is_some() {
            record.output = patch.output;
        }
        let updated = record.clone();

        tables.unindex(job_id, previous);
        tables.index(job_id, next);
        Ok(Transition::Applied(updated))
    }

    fn set_execution_handle(
        &self,
        job_id: JobId,
        handle: ExecutionHandle,
    ) -> Result<(), StoreError> {
        let mut tables = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let record = tables
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        record.execution_handle = Some(handle);
        record.updated_at = Utc::now();
        Ok(())
    }

    fn record_launch_failure(&self, job_id: JobId, reason: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let record = tables
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        record.error_message = Some(reason.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    fn note_worker_exit(
        &self,
        job_id: JobId,
        seen_at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        let mut tables = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let record = tables
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        record.worker_exited_at.get_or_insert(seen_at);
        Ok(record.clone())
    }
}

impl JobRegistry for Arc<InMemoryJobRegistry> {
    fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        (**self).insert(record)
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        (**self).get(job_id)
    }

    fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<JobRecord>, StoreError> {
        (**self).list_by_status(statuses)
    }

    fn transition(
        &self,
        job_id: JobId,
        next: JobStatus,
        patch: RecordPatch,
    ) -> Result<Transition, StoreError> {
        (**self).transition(job_id, next, patch)
    }

    fn set_execution_handle(
        &self,
        job_id: JobId,
        handle: ExecutionHandle,
    ) -> Result<(), StoreError> {
        (**self).set_execution_handle(job_id, handle)
    }

    fn record_launch_failure(&self, job_id: JobId, reason: &str) -> Result<(), StoreError> {
        (**self).record_launch_failure(job_id, reason)
    }

    fn note_worker_exit(
        &self,
        job_id: JobId,
        seen_at: DateTime<Utc>,
    ) -> Result<JobRecord, StoreError> {
        (**self).note_worker_exit(job_id, seen_at)
    }
}
