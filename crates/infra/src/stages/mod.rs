//! The three independently triggered stages of the job lifecycle.
//!
//! Stages share nothing but the [`StageContext`]: the two stores, the worker
//! launcher, the continuation resolver and the sweep schedule. Any number of
//! stage invocations may run concurrently against the same job.
//!
//! ## Settlement
//!
//! A job reaches a terminal status through a conditional registry transition. Only
//! the stage whose transition was applied takes the continuation (atomic
//! delete-if-exists) and resolves it, so a blocked caller is resumed exactly once
//! and always with the outcome the registry recorded.

pub mod completion;
pub mod dispatch;
pub mod monitor;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use fqdecomp_core::{ContinuationKey, JobError, JobRecord};

use crate::config::OrchestratorConfig;
use crate::jobs::{ContinuationStore, JobRegistry};
use crate::layout::ObjectLayout;
use crate::resolver::{ContinuationResolver, Resolution};
use crate::schedule::SweepSchedule;
use crate::worker::WorkerLauncher;

pub use completion::{CompletionOutcome, CompletionStage};
pub use dispatch::DispatchStage;
pub use monitor::{JobCheck, LivenessMonitor, SweepReport};

/// Shared handles every stage works through.
#[derive(Clone)]
pub struct StageContext {
    pub registry: Arc<dyn JobRegistry>,
    pub continuations: Arc<dyn ContinuationStore>,
    pub launcher: Arc<dyn WorkerLauncher>,
    pub resolver: Arc<dyn ContinuationResolver>,
    pub schedule: Arc<dyn SweepSchedule>,
    pub layout: ObjectLayout,
    pub job_ttl: Duration,
    pub continuation_ttl: Duration,
    pub completion_grace: Duration,
}

impl StageContext {
    pub fn new(
        config: &OrchestratorConfig,
        registry: Arc<dyn JobRegistry>,
        continuations: Arc<dyn ContinuationStore>,
        launcher: Arc<dyn WorkerLauncher>,
        resolver: Arc<dyn ContinuationResolver>,
        schedule: Arc<dyn SweepSchedule>,
    ) -> Self {
        Self {
            registry,
            continuations,
            launcher,
            resolver,
            schedule,
            layout: config.layout.clone(),
            job_ttl: config.job_ttl,
            continuation_ttl: config.continuation_ttl,
            completion_grace: config.completion_grace,
        }
    }

    /// Called once by whichever stage moved `record` to a terminal status: release
    /// its worker, then consume the continuation, if any, and resolve it.
    ///
    /// Returns whether a continuation was consumed. A resolver failure after the
    /// take is logged; the record is gone either way and is never resolved twice.
    pub(crate) fn settle(
        &self,
        record: &JobRecord,
        resolution: Resolution,
    ) -> Result<bool, JobError> {
        let job_id = record.id;
        if let Some(handle) = &record.execution_handle {
            self.launcher.release(handle);
        }

        let key = ContinuationKey::for_job(job_id);
        let Some(continuation) = self.continuations.take(&key)? else {
            debug!(job_id = %job_id, "no pending continuation");
            return Ok(false);
        };

        let success = resolution.is_success();
        match self.resolver.resolve(&continuation.token, resolution) {
            Ok(()) => debug!(job_id = %job_id, success, "continuation resolved"),
            Err(e) => error!(job_id = %job_id, error = %e, "continuation resolution failed"),
        }
        Ok(true)
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("layout", &self.layout)
            .field("job_ttl", &self.job_ttl)
            .field("continuation_ttl", &self.continuation_ttl)
            .field("completion_grace", &self.completion_grace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::OrchestratorConfig;
    use crate::jobs::{InMemoryContinuationStore, InMemoryJobRegistry};
    use crate::resolver::InMemoryResolver;
    use crate::schedule::AtomicSweepSchedule;
    use crate::worker::InMemoryWorkerLauncher;

    use super::StageContext;

    /// A context over in-memory fakes, with the fakes kept addressable.
    pub(crate) struct Harness {
        pub registry: Arc<InMemoryJobRegistry>,
        pub continuations: Arc<InMemoryContinuationStore>,
        pub launcher: Arc<InMemoryWorkerLauncher>,
        pub resolver: Arc<InMemoryResolver>,
        pub schedule: Arc<AtomicSweepSchedule>,
        pub ctx: StageContext,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            Self::with_grace(Duration::from_secs(300))
        }

        pub(crate) fn with_grace(grace: Duration) -> Self {
            let config = OrchestratorConfig {
                completion_grace: grace,
                ..OrchestratorConfig::default()
            };
            let registry = InMemoryJobRegistry::arc();
            let continuations = InMemoryContinuationStore::arc();
            let launcher = Arc::new(InMemoryWorkerLauncher::new());
            let resolver = Arc::new(InMemoryResolver::new());
            let schedule = Arc::new(AtomicSweepSchedule::default());

            let ctx = StageContext::new(
                &config,
                registry.clone(),
                continuations.clone(),
                launcher.clone(),
                resolver.clone(),
                schedule.clone(),
            );

            Self {
                registry,
                continuations,
                launcher,
                resolver,
                schedule,
                ctx,
            }
        }
    }
}
