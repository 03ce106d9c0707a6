//! Durable job state: the job registry and the continuation store.
//!
//! ## Design
//!
//! - The two stores are the only shared mutable state between stages
//! - Every write is a single conditional operation (insert-if-absent,
//!   transition-if-allowed, take-if-present)
//! - Records carry an expiry attribute; deleting expired records is left to the
//!   storage layer's retention policy
//!
//! ## Components
//!
//! - `JobRegistry`: job records, queryable by status
//! - `ContinuationStore`: pending continuation handles, consumed exactly once

pub mod continuation;
pub mod registry;

pub use continuation::{ContinuationStore, InMemoryContinuationStore};
pub use registry::{InMemoryJobRegistry, JobRegistry, RecordPatch, Transition};
