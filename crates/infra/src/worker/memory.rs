//! Scriptable worker launcher for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use fqdecomp_core::{ExecutionHandle, JobId};

use super::{LaunchError, WorkerJob, WorkerLauncher, WorkerState};

/// Records launched jobs and reports whatever state the test has set.
///
/// Launched workers start in `Running`. Handles are deterministic
/// (`mem-exec.{job_id}`) so tests can address a run by job id alone.
#[derive(Debug, Default)]
pub struct InMemoryWorkerLauncher {
    launched: Mutex<Vec<WorkerJob>>,
    states: Mutex<HashMap<JobId, WorkerState>>,
    failing_queries: Mutex<HashSet<JobId>>,
    released: Mutex<Vec<ExecutionHandle>>,
    fail_launches: AtomicBool,
}

const HANDLE_PREFIX: &str = "mem-exec.";

impl InMemoryWorkerLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    fn job_for(handle: &ExecutionHandle) -> Option<JobId> {
        handle.as_str().strip_prefix(HANDLE_PREFIX)?.parse().ok()
    }

    /// Make subsequent `launch` calls fail (or succeed again).
    pub fn fail_launches(&self, fail: bool) {
        self.fail_launches.store(fail, Ordering::SeqCst);
    }

    /// Override the reported state of a job's worker.
    pub fn set_state(&self, job_id: JobId, state: WorkerState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(job_id, state);
        }
    }

    /// Forget a worker entirely so its status reads `NotFound`.
    pub fn forget(&self, job_id: JobId) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(&job_id);
        }
    }

    /// Make status queries for a job's worker return an error.
    pub fn fail_queries_for(&self, job_id: JobId) {
        if let Ok(mut failing) = self.failing_queries.lock() {
            failing.insert(job_id);
        }
    }

    pub fn launched(&self) -> Vec<WorkerJob> {
        self.launched.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn released(&self) -> Vec<ExecutionHandle> {
        self.released.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl WorkerLauncher for InMemoryWorkerLauncher {
    fn launch(&self, job: &WorkerJob) -> Result<ExecutionHandle, LaunchError> {
        if self.fail_launches.load(Ordering::SeqCst) {
            return Err(LaunchError::Spawn("launch rejected".to_string()));
        }

        let handle = ExecutionHandle::new(format!("{HANDLE_PREFIX}{}", job.job_id))
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;
        self.states
            .lock()
            .map_err(|_| LaunchError::Spawn("state table lock poisoned".to_string()))?
            .insert(job.job_id, WorkerState::Running);
        self.launched
            .lock()
            .map_err(|_| LaunchError::Spawn("launch log lock poisoned".to_string()))?
            .push(job.clone());
        Ok(handle)
    }

    fn status(&self, handle: &ExecutionHandle) -> Result<WorkerState, LaunchError> {
        let poisoned = || LaunchError::Query {
            handle: handle.clone(),
            reason: "lock poisoned".to_string(),
        };

        let Some(job_id) = Self::job_for(handle) else {
            return Ok(WorkerState::NotFound);
        };

        if self.failing_queries.lock().map_err(|_| poisoned())?.contains(&job_id) {
            return Err(LaunchError::Query {
                handle: handle.clone(),
                reason: "status endpoint unavailable".to_string(),
            });
        }

        let states = self.states.lock().map_err(|_| poisoned())?;
        Ok(states.get(&job_id).copied().unwrap_or(WorkerState::NotFound))
    }

    fn release(&self, handle: &ExecutionHandle) {
        if let Ok(mut released) = self.released.lock() {
            released.push(handle.clone());
        }
    }
}
