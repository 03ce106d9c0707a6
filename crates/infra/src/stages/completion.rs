//! Completion stage: apply a worker's state-change event.

use tracing::{debug, info};

use fqdecomp_core::{JobError, JobId, JobStatus, StateChangeEvent};

use crate::jobs::{RecordPatch, Transition};
use crate::resolver::{Resolution, JOB_FAILED_ERROR};

use super::StageContext;

/// What a state-change event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// `Dispatched -> Running` on a non-terminal event.
    Promoted,
    /// Job reached a terminal status; `continuation` tells whether a blocked caller
    /// was resolved.
    Settled {
        status: JobStatus,
        continuation: bool,
    },
    /// Non-terminal event with nothing to update.
    Ignored,
    /// Terminal event for a job that is already terminal; absorbed.
    DuplicateOrStale,
}

#[derive(Debug, Clone)]
pub struct CompletionStage {
    ctx: StageContext,
}

impl CompletionStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Apply one event. Never dispatches further work.
    ///
    /// Fails with `UnknownJobId` when no record exists for the event's id.
    pub fn on_state_change(&self, event: StateChangeEvent) -> Result<CompletionOutcome, JobError> {
        let job_id = event.job_id;
        let record = self
            .ctx
            .registry
            .get(job_id)?
            .ok_or(JobError::UnknownJobId(job_id))?;

        match event.status {
            JobStatus::Dispatched => Ok(CompletionOutcome::Ignored),
            JobStatus::Running => {
                if record.status != JobStatus::Dispatched {
                    return Ok(CompletionOutcome::Ignored);
                }
                let promoted = self
                    .ctx
                    .registry
                    .transition(job_id, JobStatus::Running, RecordPatch::default())?;
                Ok(if promoted.is_applied() {
                    CompletionOutcome::Promoted
                } else {
                    CompletionOutcome::Ignored
                })
            }
            JobStatus::Succeeded | JobStatus::Failed => {
                if record.status.is_terminal() {
                    debug!(job_id = %job_id, status = %record.status, "duplicate or stale event");
                    return Ok(CompletionOutcome::DuplicateOrStale);
                }
                self.settle(job_id, record.status, event)
            }
        }
    }

    fn settle(
        &self,
        job_id: JobId,
        current: JobStatus,
        event: StateChangeEvent,
    ) -> Result<CompletionOutcome, JobError> {
        let status = event.status;

        // Success is only reachable from Running; a worker may finish before any
        // sweep or Running event has promoted it.
        if status == JobStatus::Succeeded && current == JobStatus::Dispatched {
            self.ctx
                .registry
                .transition(job_id, JobStatus::Running, RecordPatch::default())?;
        }

        let patch = match status {
            JobStatus::Failed => RecordPatch {
                error_message: Some(failure_detail(&event)),
                output: event.output.clone(),
            },
            _ => RecordPatch::output(event.output.clone()),
        };

        let updated = match self.ctx.registry.transition(job_id, status, patch)? {
            Transition::Applied(updated) => updated,
            Transition::Rejected { current } => {
                debug!(job_id = %job_id, status = %current, "job settled concurrently");
                return Ok(CompletionOutcome::DuplicateOrStale);
            }
        };

        let resolution = match status {
            JobStatus::Succeeded => Resolution::succeeded(&updated, event.output.as_ref()),
            _ => Resolution::failed(JOB_FAILED_ERROR, failure_detail(&event)),
        };
        let continuation = self.ctx.settle(&updated, resolution)?;

        info!(job_id = %job_id, kind = %updated.kind, %status, continuation, "job finished");
        Ok(CompletionOutcome::Settled {
            status,
            continuation,
        })
    }
}

fn failure_detail(event: &StateChangeEvent) -> String {
    event
        .detail
        .clone()
        .unwrap_or_else(|| "job failed".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use fqdecomp_core::{ContinuationToken, JobKind, JobPayload, JobRequest};

    use super::*;
    use crate::jobs::JobRegistry;
    use crate::stages::dispatch::DispatchStage;
    use crate::stages::testing::Harness;

    fn dispatch(h: &Harness, token: Option<&str>) -> (JobId, Option<ContinuationToken>) {
        let payload = JobPayload::FastqIdList(vec!["fqr.A".into()]);
        let token = token.map(|t| ContinuationToken::new(t).unwrap());
        let request = match &token {
            Some(t) => JobRequest::sync(JobKind::OraDecompression, payload, t.clone()),
            None => JobRequest::fire_and_forget(JobKind::OraDecompression, payload),
        };
        let job_id = DispatchStage::new(h.ctx.clone()).dispatch(request).unwrap();
        (job_id, token)
    }

    #[test]
    fn success_resolves_with_result_reference() {
        let h = Harness::new();
        let (job_id, token) = dispatch(&h, Some("tok"));
        let token = token.unwrap();
        let stage = CompletionStage::new(h.ctx.clone());

        let outcome = stage
            .on_state_change(
                StateChangeEvent::new(job_id, JobStatus::Succeeded)
                    .with_output(json!({"readCount": 42})),
            )
            .unwrap();

        assert_eq!(
            outcome,
            CompletionOutcome::Settled {
                status: JobStatus::Succeeded,
                continuation: true
            }
        );
        let record = h.registry.get(job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.output, Some(json!({"readCount": 42})));
        assert!(h.continuations.is_empty());

        let resolutions = h.resolver.resolutions(&token);
        assert_eq!(resolutions.len(), 1);
        let Resolution::Success { output } = &resolutions[0] else {
            panic!("expected success");
        };
        assert_eq!(output["jobId"], job_id.to_string());
        assert_eq!(output["metadataUri"], record.metadata_uri);
        assert_eq!(output["output"]["readCount"], 42);
    }

    #[test]
    fn failure_carries_detail() {
        let h = Harness::new();
        let (job_id, token) = dispatch(&h, Some("tok"));
        let stage = CompletionStage::new(h.ctx.clone());

        stage
            .on_state_change(
                StateChangeEvent::new(job_id, JobStatus::Failed).with_detail("disk full"),
            )
            .unwrap();

        let record = h.registry.get(job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("disk full"));
        assert_eq!(
            h.resolver.resolutions(&token.unwrap()),
            vec![Resolution::failed(JOB_FAILED_ERROR, "disk full")]
        );
    }

    #[test]
    fn running_event_promotes_once() {
        let h = Harness::new();
        let (job_id, _) = dispatch(&h, None);
        let stage = CompletionStage::new(h.ctx.clone());

        let running = StateChangeEvent::new(job_id, JobStatus::Running);
        assert_eq!(
            stage.on_state_change(running.clone()).unwrap(),
            CompletionOutcome::Promoted
        );
        assert_eq!(
            stage.on_state_change(running).unwrap(),
            CompletionOutcome::Ignored
        );
        assert_eq!(h.resolver.resolution_count(), 0);
    }

    #[test]
    fn duplicate_terminal_event_is_absorbed() {
        let h = Harness::new();
        let (job_id, token) = dispatch(&h, Some("tok"));
        let stage = CompletionStage::new(h.ctx.clone());
        let event = StateChangeEvent::new(job_id, JobStatus::Succeeded);

        stage.on_state_change(event.clone()).unwrap();
        let duplicate = stage.on_state_change(event).unwrap();
        let late_failure = stage
            .on_state_change(StateChangeEvent::new(job_id, JobStatus::Failed))
            .unwrap();

        assert_eq!(duplicate, CompletionOutcome::DuplicateOrStale);
        assert_eq!(late_failure, CompletionOutcome::DuplicateOrStale);
        assert_eq!(h.resolver.resolutions(&token.unwrap()).len(), 1);
        assert_eq!(
            h.registry.get(job_id).unwrap().unwrap().status,
            JobStatus::Succeeded
        );
    }

    #[test]
    fn settled_worker_is_released() {
        let h = Harness::new();
        let (job_id, _) = dispatch(&h, None);
        let handle = h.registry.get(job_id).unwrap().unwrap().execution_handle.unwrap();

        CompletionStage::new(h.ctx.clone())
            .on_state_change(StateChangeEvent::new(job_id, JobStatus::Failed))
            .unwrap();

        assert_eq!(h.launcher.released(), vec![handle]);
    }

    #[test]
    fn async_job_completes_without_resolution() {
        let h = Harness::new();
        let (job_id, _) = dispatch(&h, None);

        let outcome = CompletionStage::new(h.ctx.clone())
            .on_state_change(StateChangeEvent::new(job_id, JobStatus::Succeeded))
            .unwrap();

        assert_eq!(
            outcome,
            CompletionOutcome::Settled {
                status: JobStatus::Succeeded,
                continuation: false
            }
        );
        assert_eq!(h.resolver.resolution_count(), 0);
    }

    #[test]
    fn unknown_job_is_reported() {
        let h = Harness::new();
        let unknown = JobId::new();

        let err = CompletionStage::new(h.ctx.clone())
            .on_state_change(StateChangeEvent::new(unknown, JobStatus::Succeeded))
            .unwrap_err();

        assert_eq!(err, JobError::UnknownJobId(unknown));
    }
}
