//! Single-process orchestrator.
//!
//! Reads bus events as JSON lines on stdin, runs the lifecycle stages against
//! in-memory stores, launches workers as child processes and writes continuation
//! resolutions as JSON lines on stdout. Logs go to stderr.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use fqdecomp_events::{BusEvent, EventBus, EventRouter, InMemoryEventBus};
use fqdecomp_infra::jobs::{InMemoryContinuationStore, InMemoryJobRegistry};
use fqdecomp_infra::resolver::JsonLinesResolver;
use fqdecomp_infra::stages::StageContext;
use fqdecomp_infra::worker::ProcessWorkerLauncher;
use fqdecomp_infra::{AtomicSweepSchedule, Orchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fqdecomp_observability::init();

    let config = OrchestratorConfig::from_env().context("invalid configuration")?;
    let launcher = ProcessWorkerLauncher::from_command_line(config.require_worker_command()?)
        .context("FQDECOMP_WORKER_COMMAND is blank")?;

    let ctx = StageContext::new(
        &config,
        InMemoryJobRegistry::arc(),
        InMemoryContinuationStore::arc(),
        Arc::new(launcher),
        Arc::new(JsonLinesResolver::new(std::io::stdout())),
        Arc::new(AtomicSweepSchedule::default()),
    );

    let bus: Arc<InMemoryEventBus<BusEvent>> = Arc::new(InMemoryEventBus::new());
    let orchestrator = Arc::new(Orchestrator::new(
        EventRouter::new(config.event_source.clone()),
        ctx,
    ));
    let handle = orchestrator
        .spawn(bus.clone(), config.sweep_interval)
        .context("failed to start orchestrator threads")?;

    info!(
        bucket = %config.layout.bucket,
        source = %config.event_source,
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "reading events from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) => publish_line(bus.as_ref(), &line),
                None => {
                    info!("stdin closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .context("shutdown task panicked")?;
    Ok(())
}

fn publish_line(bus: &InMemoryEventBus<BusEvent>, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<BusEvent>(line) {
        Ok(event) => {
            if let Err(e) = bus.publish(event) {
                warn!(error = %e, "failed to publish event");
            }
        }
        Err(e) => warn!(error = %e, "ignoring line that is not a bus event"),
    }
}
