//! Liveness monitor: the periodic sweep over in-flight jobs.
//!
//! The sweep is the safety net behind completion events. It confirms running
//! workers (keeping their callers' waits alive) and force-fails jobs whose worker
//! has vanished or stopped without reporting. It disarms its own schedule once
//! nothing is in flight.

use chrono::Utc;
use tracing::{debug, info, warn};

use fqdecomp_core::{ContinuationKey, JobError, JobId, JobRecord, JobStatus};

use crate::jobs::{RecordPatch, Transition};
use crate::resolver::{Resolution, DISPATCH_FAILED_ERROR, WORKER_LOST_ERROR};
use crate::worker::WorkerState;

use super::StageContext;

/// What one sweep did to one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCheck {
    /// Worker confirmed running.
    Alive,
    /// No result yet and still within the grace window: the worker exited cleanly
    /// and its terminal event may be in transit, or it has not been launched yet.
    AwaitingEvent,
    /// Job force-failed by this sweep.
    Lost,
    /// Another stage settled the job first.
    AlreadySettled,
    /// Status query failed; retried next tick.
    Unreachable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub alive: usize,
    pub lost: Vec<JobId>,
    pub errors: usize,
    /// The schedule was left disarmed because nothing was in flight.
    pub disarmed: bool,
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    ctx: StageContext,
}

impl LivenessMonitor {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Run one sweep.
    ///
    /// Only the listing is fatal; per-job failures are counted and the job is
    /// looked at again on the next tick.
    pub fn sweep(&self) -> Result<SweepReport, JobError> {
        let in_flight = self.ctx.registry.list_by_status(&JobStatus::IN_FLIGHT)?;
        let mut report = SweepReport::default();

        if in_flight.is_empty() {
            report.disarmed = self.disarm_if_idle()?;
            return Ok(report);
        }

        for record in &in_flight {
            report.examined += 1;
            match self.check(record) {
                Ok(JobCheck::Alive) => report.alive += 1,
                Ok(JobCheck::Lost) => report.lost.push(record.id),
                Ok(JobCheck::Unreachable) => report.errors += 1,
                Ok(JobCheck::AwaitingEvent | JobCheck::AlreadySettled) => {}
                Err(e) => {
                    warn!(job_id = %record.id, error = %e, "liveness check failed");
                    report.errors += 1;
                }
            }
        }

        debug!(
            examined = report.examined,
            alive = report.alive,
            lost = report.lost.len(),
            errors = report.errors,
            "sweep finished"
        );
        Ok(report)
    }

    /// Disarm, then look again: a dispatch that raced the empty listing armed
    /// before or after our disarm, and in the latter case its record is visible now.
    fn disarm_if_idle(&self) -> Result<bool, JobError> {
        if self.ctx.schedule.disarm() {
            info!("no jobs in flight, sweep schedule disarmed");
        }

        let late = self.ctx.registry.list_by_status(&JobStatus::IN_FLIGHT)?;
        if late.is_empty() {
            return Ok(true);
        }

        if self.ctx.schedule.arm() {
            info!(in_flight = late.len(), "jobs admitted during disarm, sweep schedule re-armed");
        }
        Ok(false)
    }

    /// Inspect one in-flight job.
    pub fn check(&self, record: &JobRecord) -> Result<JobCheck, JobError> {
        let now = Utc::now();

        let Some(handle) = &record.execution_handle else {
            if let Some(reason) = &record.error_message {
                return self.lose(record, DISPATCH_FAILED_ERROR, reason);
            }
            // Dispatch may still be between insert and launch.
            if record.is_older_than(self.ctx.completion_grace, now) {
                return self.lose(record, WORKER_LOST_ERROR, "no worker execution recorded");
            }
            return Ok(JobCheck::AwaitingEvent);
        };

        let state = match self.ctx.launcher.status(handle) {
            Ok(state) => state,
            Err(e) => {
                warn!(job_id = %record.id, execution = %handle, error = %e, "worker status query failed");
                return Ok(JobCheck::Unreachable);
            }
        };

        match state {
            WorkerState::Running => {
                self.confirm_running(record)?;
                Ok(JobCheck::Alive)
            }
            WorkerState::Exited { success: true } => {
                // The grace window opens at the first sweep that sees the exit.
                let seen = self.ctx.registry.note_worker_exit(record.id, now)?;
                if seen.exit_grace_elapsed(self.ctx.completion_grace, now) {
                    self.lose(&seen, WORKER_LOST_ERROR, "worker exited without reporting a result")
                } else {
                    Ok(JobCheck::AwaitingEvent)
                }
            }
            WorkerState::Exited { success: false } => {
                self.lose(record, WORKER_LOST_ERROR, "worker exited with failure")
            }
            WorkerState::NotFound => {
                self.lose(record, WORKER_LOST_ERROR, "worker execution not found")
            }
        }
    }

    fn confirm_running(&self, record: &JobRecord) -> Result<(), JobError> {
        let key = ContinuationKey::for_job(record.id);
        if let Some(continuation) = self.ctx.continuations.get(&key)? {
            if let Err(e) = self.ctx.resolver.heartbeat(&continuation.token) {
                warn!(job_id = %record.id, error = %e, "heartbeat failed");
            }
        }

        if record.status == JobStatus::Dispatched {
            let promoted = self
                .ctx
                .registry
                .transition(record.id, JobStatus::Running, RecordPatch::default())?;
            if promoted.is_applied() {
                debug!(job_id = %record.id, "worker confirmed, job running");
            }
        }
        Ok(())
    }

    fn lose(
        &self,
        record: &JobRecord,
        error_name: &str,
        reason: &str,
    ) -> Result<JobCheck, JobError> {
        let lost = JobError::WorkerLost {
            job_id: record.id,
            reason: reason.to_string(),
        };

        match self
            .ctx
            .registry
            .transition(record.id, JobStatus::Failed, RecordPatch::error(reason))?
        {
            Transition::Applied(updated) => {
                warn!(job_id = %record.id, kind = %record.kind, error = %lost, "job failed by sweep");
                self.ctx
                    .settle(&updated, Resolution::failed(error_name, reason))?;
                Ok(JobCheck::Lost)
            }
            Transition::Rejected { current } => {
                debug!(job_id = %record.id, status = %current, "job settled before sweep");
                Ok(JobCheck::AlreadySettled)
            }
        }
    }
}
