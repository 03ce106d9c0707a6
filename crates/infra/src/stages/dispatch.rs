//! Dispatch stage: admit a request, persist it and launch its worker.

use tracing::{error, info, warn};

use fqdecomp_core::{ContinuationRecord, JobError, JobId, JobRecord, JobRequest};

use crate::resolver::{Resolution, DISPATCH_FAILED_ERROR};
use crate::worker::WorkerJob;

use super::StageContext;

#[derive(Debug, Clone)]
pub struct DispatchStage {
    ctx: StageContext,
}

impl DispatchStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Admit one job.
    ///
    /// Ordering: continuation first, then the job record, then the worker, then the
    /// sweep schedule. Every record the sweep could look for exists before the
    /// schedule is armed, and a continuation exists before anything could resolve it.
    ///
    /// Once the record is written the schedule is armed whatever happens next, so
    /// the sweep settles a job whose launch or handle write failed. A launch
    /// failure is also reported to the caller as `DispatchFailed`.
    pub fn dispatch(&self, request: JobRequest) -> Result<JobId, JobError> {
        request.payload.validate()?;

        let job_id = JobId::new();
        let kind = request.kind;

        if let Some(token) = &request.continuation {
            let record = ContinuationRecord::new(job_id, token.clone(), self.ctx.continuation_ttl);
            self.ctx.continuations.put(record)?;
        }

        let record = self.new_record(job_id, &request);
        if let Err(e) = self.ctx.registry.insert(record.clone()) {
            error!(job_id = %job_id, error = %e, "failed to persist job record");
            self.abandon_continuation(&record, &e.to_string());
            return Err(e.into());
        }

        let launched = self
            .ctx
            .launcher
            .launch(&WorkerJob::for_record(&record, &self.ctx.layout));

        let handle = match launched {
            Ok(handle) => handle,
            Err(e) => {
                let reason = e.to_string();
                error!(job_id = %job_id, %kind, error = %reason, "worker launch failed");
                if let Err(e) = self.ctx.registry.record_launch_failure(job_id, &reason) {
                    warn!(job_id = %job_id, error = %e, "failed to note launch failure");
                }
                self.arm();
                return Err(JobError::DispatchFailed { job_id, reason });
            }
        };

        let recorded = self.ctx.registry.set_execution_handle(job_id, handle.clone());
        self.arm();
        if let Err(e) = recorded {
            error!(job_id = %job_id, execution = %handle, error = %e, "failed to record execution handle");
            return Err(e.into());
        }

        info!(job_id = %job_id, %kind, execution = %handle, "job dispatched");
        Ok(job_id)
    }

    fn arm(&self) {
        if self.ctx.schedule.arm() {
            info!("sweep schedule armed");
        }
    }

    fn new_record(&self, job_id: JobId, request: &JobRequest) -> JobRecord {
        let mut record = JobRecord::new(
            job_id,
            request.kind,
            request.payload.clone(),
            request.options.clone(),
            String::new(),
            String::new(),
            self.ctx.job_ttl,
        );

        let layout = &self.ctx.layout;
        record.output_uri_prefix = match &request.options.output_uri_prefix {
            Some(prefix) => prefix.clone(),
            None => layout.output_uri_prefix(job_id, record.created_at),
        };
        record.metadata_uri = layout.metadata_uri(job_id, record.created_at);
        record
    }

    /// Resolve and drop a continuation whose job never made it into the registry.
    fn abandon_continuation(&self, record: &JobRecord, reason: &str) {
        if let Err(e) = self
            .ctx
            .settle(record, Resolution::failed(DISPATCH_FAILED_ERROR, reason))
        {
            warn!(job_id = %record.id, error = %e, "failed to release continuation");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use fqdecomp_core::{
        ContinuationKey, ContinuationToken, ExecutionHandle, JobKind, JobOptions, JobPayload,
        JobStatus,
    };

    use super::*;
    use crate::error::StoreError;
    use crate::jobs::{ContinuationStore, InMemoryJobRegistry, JobRegistry, RecordPatch, Transition};
    use crate::schedule::SweepSchedule;
    use crate::stages::testing::Harness;
    use crate::stages::LivenessMonitor;

    /// Registry whose execution-handle writes always fail.
    struct HandleWritesFail(Arc<InMemoryJobRegistry>);

    impl JobRegistry for HandleWritesFail {
        fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
            self.0.insert(record)
        }

        fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
            self.0.get(job_id)
        }

        fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<JobRecord>, StoreError> {
            self.0.list_by_status(statuses)
        }

        fn transition(
            &self,
            job_id: JobId,
            next: JobStatus,
            patch: RecordPatch,
        ) -> Result<Transition, StoreError> {
            self.0.transition(job_id, next, patch)
        }

        fn set_execution_handle(
            &self,
            _job_id: JobId,
            _handle: ExecutionHandle,
        ) -> Result<(), StoreError> {
            Err(StoreError::Storage("write timed out".to_string()))
        }

        fn record_launch_failure(&self, job_id: JobId, reason: &str) -> Result<(), StoreError> {
            self.0.record_launch_failure(job_id, reason)
        }

        fn note_worker_exit(
            &self,
            job_id: JobId,
            seen_at: DateTime<Utc>,
        ) -> Result<JobRecord, StoreError> {
            self.0.note_worker_exit(job_id, seen_at)
        }
    }

    fn payload() -> JobPayload {
        JobPayload::FastqIdList(vec!["fqr.A".into(), "fqr.B".into()])
    }

    #[test]
    fn sync_dispatch_stores_continuation_then_launches_and_arms() {
        let h = Harness::new();
        let stage = DispatchStage::new(h.ctx.clone());
        let token = ContinuationToken::new("tok").unwrap();

        let job_id = stage
            .dispatch(JobRequest::sync(JobKind::OraDecompression, payload(), token.clone()))
            .unwrap();

        let record = h.registry.get(job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Dispatched);
        assert!(record.execution_handle.is_some());
        assert!(record.output_uri_prefix.contains("decompression-data/year="));
        assert!(record.output_uri_prefix.ends_with(&format!("{job_id}/")));
        assert!(record.metadata_uri.contains("metadata/year="));

        let continuation = h
            .continuations
            .get(&ContinuationKey::for_job(job_id))
            .unwrap()
            .unwrap();
        assert_eq!(continuation.token, token);

        assert_eq!(h.launcher.launched().len(), 1);
        assert_eq!(h.launcher.launched()[0].job_id, job_id);
        assert!(h.schedule.is_armed());
    }

    #[test]
    fn async_dispatch_has_no_continuation() {
        let h = Harness::new();
        let stage = DispatchStage::new(h.ctx.clone());

        let job_id = stage
            .dispatch(JobRequest::fire_and_forget(JobKind::ReadCountCalculation, payload()))
            .unwrap();

        assert!(h.continuations.is_empty());
        assert!(h.registry.get(job_id).unwrap().is_some());
    }

    #[test]
    fn requested_output_prefix_is_kept() {
        let h = Harness::new();
        let stage = DispatchStage::new(h.ctx.clone());
        let options = JobOptions {
            output_uri_prefix: Some("s3://elsewhere/out/".into()),
            max_reads: 1000,
            ..JobOptions::default()
        };

        let job_id = stage
            .dispatch(
                JobRequest::fire_and_forget(JobKind::GzipFileSizeCalculation, payload())
                    .with_options(options),
            )
            .unwrap();

        let record = h.registry.get(job_id).unwrap().unwrap();
        assert_eq!(record.output_uri_prefix, "s3://elsewhere/out/");
        assert_eq!(h.launcher.launched()[0].max_reads, 1000);
    }

    #[test]
    fn launch_failure_is_reported_and_left_to_the_sweep() {
        let h = Harness::new();
        h.launcher.fail_launches(true);
        let stage = DispatchStage::new(h.ctx.clone());
        let token = ContinuationToken::new("tok").unwrap();

        let err = stage
            .dispatch(JobRequest::sync(JobKind::OraDecompression, payload(), token.clone()))
            .unwrap_err();

        let job_id = match err {
            JobError::DispatchFailed { job_id, .. } => job_id,
            other => panic!("expected DispatchFailed, got {other:?}"),
        };
        let record = h.registry.get(job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Dispatched);
        assert!(record.execution_handle.is_none());
        assert!(record.error_message.is_some());
        assert!(h
            .continuations
            .get(&ContinuationKey::for_job(job_id))
            .unwrap()
            .is_some());
        assert!(h.resolver.resolutions(&token).is_empty());
        assert!(h.schedule.is_armed());

        let report = LivenessMonitor::new(h.ctx.clone()).sweep().unwrap();

        assert_eq!(report.lost, vec![job_id]);
        assert_eq!(h.registry.get(job_id).unwrap().unwrap().status, JobStatus::Failed);
        assert!(h.continuations.is_empty());
        let resolutions = h.resolver.resolutions(&token);
        assert_eq!(resolutions.len(), 1);
        assert!(matches!(
            &resolutions[0],
            Resolution::Failure { error, .. } if error == DISPATCH_FAILED_ERROR
        ));
    }

    #[test]
    fn failed_handle_write_still_arms_the_sweep() {
        let h = Harness::with_grace(Duration::ZERO);
        let mut ctx = h.ctx.clone();
        ctx.registry = Arc::new(HandleWritesFail(h.registry.clone()));
        let token = ContinuationToken::new("tok").unwrap();
        assert!(!h.schedule.is_armed());

        let err = DispatchStage::new(ctx)
            .dispatch(JobRequest::sync(JobKind::OraDecompression, payload(), token.clone()))
            .unwrap_err();

        assert!(matches!(err, JobError::Storage(_)));
        assert!(h.schedule.is_armed());
        let in_flight = h.registry.list_by_status(&JobStatus::IN_FLIGHT).unwrap();
        assert_eq!(in_flight.len(), 1);
        let job_id = in_flight[0].id;

        std::thread::sleep(Duration::from_millis(5));
        let report = LivenessMonitor::new(h.ctx.clone()).sweep().unwrap();

        assert_eq!(report.lost, vec![job_id]);
        assert_eq!(h.resolver.resolutions(&token).len(), 1);
        assert!(h.continuations.is_empty());
    }

    #[test]
    fn oversized_ttl_does_not_break_dispatch() {
        let h = Harness::new();
        let mut ctx = h.ctx.clone();
        ctx.job_ttl = Duration::from_secs(100_000_000 * 86_400);
        ctx.continuation_ttl = Duration::from_secs(u64::MAX);
        let token = ContinuationToken::new("tok").unwrap();

        let job_id = DispatchStage::new(ctx)
            .dispatch(JobRequest::sync(JobKind::OraDecompression, payload(), token))
            .unwrap();

        let record = h.registry.get(job_id).unwrap().unwrap();
        assert!(record.expires_at > record.created_at);
    }

    #[test]
    fn empty_payload_is_rejected_before_any_write() {
        let h = Harness::new();
        let stage = DispatchStage::new(h.ctx.clone());

        let err = stage
            .dispatch(JobRequest::fire_and_forget(
                JobKind::OraDecompression,
                JobPayload::FastqIdList(vec![]),
            ))
            .unwrap_err();

        assert!(matches!(err, JobError::Domain(_)));
        assert!(h.launcher.launched().is_empty());
        assert!(!h.schedule.is_armed());
    }
}
