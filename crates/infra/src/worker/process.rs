//! Worker launcher that runs each job as a child process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use fqdecomp_core::ExecutionHandle;

use super::{LaunchError, WorkerJob, WorkerLauncher, WorkerState};

/// Env var carrying the JSON job descriptor.
pub const JOB_ENV_VAR: &str = "FQDECOMP_JOB";

/// Spawns `program args..` per job with the descriptor in [`JOB_ENV_VAR`].
///
/// Worker stdout is discarded: the service's own stdout carries resolutions.
/// Workers log to the inherited stderr.
///
/// A child is tracked until its job is released. A handle that was never issued
/// by this process (e.g. after a restart) reports `NotFound`.
#[derive(Debug)]
pub struct ProcessWorkerLauncher {
    program: PathBuf,
    args: Vec<String>,
    children: Mutex<Children>,
}

#[derive(Debug, Default)]
struct Children {
    running: HashMap<ExecutionHandle, Child>,
    /// Released while still running; waited on until they exit.
    detached: Vec<Child>,
}

impl Children {
    fn reap_detached(&mut self) {
        self.detached
            .retain_mut(|child| matches!(child.try_wait(), Ok(None)));
    }
}

impl ProcessWorkerLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            children: Mutex::new(Children::default()),
        }
    }

    /// Build from a whitespace-separated command line.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// Children not yet released or not yet reaped.
    pub fn tracked(&self) -> usize {
        self.children
            .lock()
            .map(|c| c.running.len() + c.detached.len())
            .unwrap_or_default()
    }
}

impl WorkerLauncher for ProcessWorkerLauncher {
    fn launch(&self, job: &WorkerJob) -> Result<ExecutionHandle, LaunchError> {
        let descriptor =
            serde_json::to_string(job).map_err(|e| LaunchError::Spawn(e.to_string()))?;

        let child = Command::new(&self.program)
            .args(&self.args)
            .env(JOB_ENV_VAR, descriptor)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| LaunchError::Spawn(format!("{}: {e}", self.program.display())))?;

        let handle = ExecutionHandle::new(format!("{}:{}", job.job_id, child.id()))
            .map_err(|e| LaunchError::Spawn(e.to_string()))?;

        info!(job_id = %job.job_id, execution = %handle, "worker process started");

        let mut children = self
            .children
            .lock()
            .map_err(|_| LaunchError::Spawn("child table lock poisoned".to_string()))?;
        children.reap_detached();
        children.running.insert(handle.clone(), child);

        Ok(handle)
    }

    fn status(&self, handle: &ExecutionHandle) -> Result<WorkerState, LaunchError> {
        let mut children = self.children.lock().map_err(|_| LaunchError::Query {
            handle: handle.clone(),
            reason: "child table lock poisoned".to_string(),
        })?;

        let Some(child) = children.running.get_mut(handle) else {
            return Ok(WorkerState::NotFound);
        };

        match child.try_wait() {
            Ok(None) => Ok(WorkerState::Running),
            Ok(Some(status)) => {
                debug!(execution = %handle, ?status, "worker process exited");
                Ok(WorkerState::Exited {
                    success: status.success(),
                })
            }
            Err(e) => Err(LaunchError::Query {
                handle: handle.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn release(&self, handle: &ExecutionHandle) {
        let Ok(mut children) = self.children.lock() else {
            warn!(execution = %handle, "child table lock poisoned, worker not released");
            return;
        };
        children.reap_detached();
        let Some(mut child) = children.running.remove(handle) else {
            return;
        };
        if matches!(child.try_wait(), Ok(None)) {
            debug!(execution = %handle, "released worker still running");
            children.detached.push(child);
        }
    }
}
