//! `fqdecomp-core`: domain building blocks for the decompression job orchestrator.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, job kinds, the job status state machine, persisted record
//! shapes and the error taxonomy.

pub mod continuation;
pub mod error;
pub mod id;
pub mod job;
pub mod request;

pub use continuation::{ContinuationKey, ContinuationRecord, ContinuationType};
pub use error::{DomainError, DomainResult, JobError};
pub use id::{ContinuationToken, ExecutionHandle, JobId};
pub use job::{JobKind, JobRecord, JobStatus};
pub use request::{Flavor, JobOptions, JobPayload, JobRequest, StateChangeEvent};
