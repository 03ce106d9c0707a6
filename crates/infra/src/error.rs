//! Storage error shared by the durable stores.

use fqdecomp_core::{JobError, JobId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(JobId),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub(crate) fn poisoned() -> Self {
        StoreError::Storage("lock poisoned".to_string())
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => JobError::UnknownJobId(id),
            other => JobError::storage(other.to_string()),
        }
    }
}
