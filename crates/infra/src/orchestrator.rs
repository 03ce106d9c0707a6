//! Runtime wiring: route bus events to stages and drive the sweep timer.
//!
//! ## Threads
//!
//! - consumer: subscribes to the bus, classifies each event and runs its stage
//! - ticker: publishes a sweep tick every interval while the schedule is armed
//!
//! Both stop on [`OrchestratorHandle::shutdown`] or when the bus goes away.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use fqdecomp_core::{JobError, JobId};
use fqdecomp_events::{BusEvent, EventBus, EventRouter, Route, RouteError, Subscription};

use crate::stages::{
    CompletionOutcome, CompletionStage, DispatchStage, LivenessMonitor, StageContext, SweepReport,
};

/// What handling one event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Dispatched(JobId),
    Swept(SweepReport),
    Completed(CompletionOutcome),
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Job(#[from] JobError),
}

#[derive(Debug)]
pub struct Orchestrator {
    router: EventRouter,
    ctx: StageContext,
    dispatch: DispatchStage,
    monitor: LivenessMonitor,
    completion: CompletionStage,
}

impl Orchestrator {
    pub fn new(router: EventRouter, ctx: StageContext) -> Self {
        Self {
            dispatch: DispatchStage::new(ctx.clone()),
            monitor: LivenessMonitor::new(ctx.clone()),
            completion: CompletionStage::new(ctx.clone()),
            router,
            ctx,
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Classify one event and run the matching stage on the calling thread.
    pub fn handle(&self, event: &BusEvent) -> Result<Handled, HandleError> {
        match self.router.classify(event)? {
            Route::Admit(request) => Ok(Handled::Dispatched(self.dispatch.dispatch(request)?)),
            Route::Sweep => Ok(Handled::Swept(self.monitor.sweep()?)),
            Route::StateChange(change) => Ok(Handled::Completed(
                self.completion.on_state_change(change)?,
            )),
        }
    }

    /// [`handle`](Self::handle), with every outcome logged at the level its kind
    /// calls for. Used by the consumer loop.
    pub fn handle_logged(&self, event: &BusEvent) {
        let event_id = event.id();
        match self.handle(event) {
            Ok(handled) => debug!(%event_id, ?handled, "event handled"),
            Err(HandleError::Route(RouteError::Unmatched { .. })) => {}
            Err(HandleError::Route(e)) => warn!(%event_id, error = %e, "malformed event dropped"),
            Err(HandleError::Job(e @ JobError::UnknownJobId(_))) => {
                warn!(%event_id, error = %e, "event dropped")
            }
            Err(HandleError::Job(e)) => error!(%event_id, error = %e, "event handling failed"),
        }
    }

    /// Start the consumer and ticker threads.
    pub fn spawn<B>(
        self: Arc<Self>,
        bus: Arc<B>,
        sweep_interval: Duration,
    ) -> io::Result<OrchestratorHandle>
    where
        B: EventBus<BusEvent> + 'static,
    {
        let subscription = bus.subscribe();
        let (consumer_tx, consumer_rx) = mpsc::channel::<()>();
        let (ticker_tx, ticker_rx) = mpsc::channel::<()>();

        let orchestrator = self.clone();
        let consumer = thread::Builder::new()
            .name("fqdecomp-consumer".to_string())
            .spawn(move || consumer_loop(&orchestrator, subscription, consumer_rx))?;

        let ticker = thread::Builder::new()
            .name("fqdecomp-ticker".to_string())
            .spawn(move || ticker_loop(&self, bus.as_ref(), sweep_interval, ticker_rx));

        let ticker = match ticker {
            Ok(join) => join,
            Err(e) => {
                let _ = consumer_tx.send(());
                let _ = consumer.join();
                return Err(e);
            }
        };

        info!(interval_secs = sweep_interval.as_secs_f64(), "orchestrator started");
        Ok(OrchestratorHandle {
            shutdown: vec![consumer_tx, ticker_tx],
            joins: vec![consumer, ticker],
        })
    }
}

/// Handle to stop the runtime threads.
#[derive(Debug)]
pub struct OrchestratorHandle {
    shutdown: Vec<mpsc::Sender<()>>,
    joins: Vec<thread::JoinHandle<()>>,
}

impl OrchestratorHandle {
    /// Request graceful shutdown and wait for both threads.
    pub fn shutdown(self) {
        for tx in &self.shutdown {
            let _ = tx.send(());
        }
        for join in self.joins {
            let _ = join.join();
        }
        info!("orchestrator stopped");
    }
}

fn consumer_loop(
    orchestrator: &Orchestrator,
    subscription: Subscription<BusEvent>,
    shutdown_rx: mpsc::Receiver<()>,
) {
    let poll = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(poll) {
            Ok(event) => orchestrator.handle_logged(&event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn ticker_loop<B>(
    orchestrator: &Orchestrator,
    bus: &B,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) where
    B: EventBus<BusEvent>,
{
    loop {
        match shutdown_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if !orchestrator.ctx.schedule.is_armed() {
            continue;
        }
        if let Err(e) = bus.publish(orchestrator.router.sweep_tick()) {
            warn!(error = ?e, "failed to publish sweep tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use fqdecomp_core::{JobKind, JobStatus, StateChangeEvent};
    use fqdecomp_events::RequestClass;

    use super::*;
    use crate::jobs::JobRegistry;
    use crate::stages::testing::Harness;

    fn request_event(detail_type: &str, detail: serde_json::Value) -> BusEvent {
        BusEvent::new(detail_type, "orcabus.requester", detail)
    }

    #[test]
    fn routes_each_event_to_its_stage() {
        let h = Harness::new();
        let orchestrator = Orchestrator::new(EventRouter::default(), h.ctx.clone());

        let admit = request_event(
            RequestClass {
                kind: JobKind::ReadCountCalculation,
                flavor: fqdecomp_core::Flavor::Async,
            }
            .detail_type(),
            json!({"payload": {"fastqIdList": ["fqr.A"]}}),
        );
        let Handled::Dispatched(job_id) = orchestrator.handle(&admit).unwrap() else {
            panic!("expected dispatch");
        };

        let tick = orchestrator.router().sweep_tick();
        let Handled::Swept(report) = orchestrator.handle(&tick).unwrap() else {
            panic!("expected sweep");
        };
        assert_eq!(report.alive, 1);

        let done = orchestrator
            .router()
            .state_change(&StateChangeEvent::new(job_id, JobStatus::Succeeded));
        assert_eq!(
            orchestrator.handle(&done).unwrap(),
            Handled::Completed(CompletionOutcome::Settled {
                status: JobStatus::Succeeded,
                continuation: false
            })
        );
        assert_eq!(
            h.registry.get(job_id).unwrap().unwrap().status,
            JobStatus::Succeeded
        );
    }

    #[test]
    fn duplicate_state_change_is_handled_not_failed() {
        let h = Harness::new();
        let orchestrator = Orchestrator::new(EventRouter::default(), h.ctx.clone());
        let admit = request_event(
            RequestClass {
                kind: JobKind::OraDecompression,
                flavor: fqdecomp_core::Flavor::Async,
            }
            .detail_type(),
            json!({"payload": {"fastqIdList": ["fqr.A"]}}),
        );
        let Handled::Dispatched(job_id) = orchestrator.handle(&admit).unwrap() else {
            panic!("expected dispatch");
        };

        let failed = orchestrator
            .router()
            .state_change(&StateChangeEvent::new(job_id, JobStatus::Failed));
        orchestrator.handle(&failed).unwrap();

        assert_eq!(
            orchestrator.handle(&failed).unwrap(),
            Handled::Completed(CompletionOutcome::DuplicateOrStale)
        );
    }

    #[test]
    fn unroutable_events_surface_route_errors() {
        let h = Harness::new();
        let orchestrator = Orchestrator::new(EventRouter::default(), h.ctx.clone());

        let err = orchestrator
            .handle(&request_event("SomethingElse", json!({})))
            .unwrap_err();
        assert!(matches!(err, HandleError::Route(RouteError::Unmatched { .. })));

        orchestrator.handle_logged(&request_event("SomethingElse", json!({})));
    }
}
