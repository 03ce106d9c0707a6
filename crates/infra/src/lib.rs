//! Infrastructure layer: stores, worker execution, continuation resolution, the
//! lifecycle stages and the runtime that drives them.

pub mod config;
pub mod error;
pub mod jobs;
pub mod layout;
pub mod orchestrator;
pub mod resolver;
pub mod schedule;
pub mod stages;
pub mod worker;


pub use config::{ConfigError, OrchestratorConfig};
pub use error::StoreError;
pub use orchestrator::{HandleError, Handled, Orchestrator, OrchestratorHandle};
pub use schedule::{AtomicSweepSchedule, SweepSchedule};
