//! Pending continuation records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ContinuationToken, JobId};
use crate::job::expiry;

/// Discriminator that lets a job carry more than one kind of continuation.
///
/// Only one is used today; it is stored as the literal `job_id`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContinuationType {
    #[serde(rename = "job_id")]
    JobId,
}

impl ContinuationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContinuationType::JobId => "job_id",
        }
    }
}

/// Composite key `(id, id_type)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationKey {
    pub id: JobId,
    pub id_type: ContinuationType,
}

impl ContinuationKey {
    pub fn for_job(id: JobId) -> Self {
        Self {
            id,
            id_type: ContinuationType::JobId,
        }
    }
}

impl core::fmt::Display for ContinuationKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {})", self.id, self.id_type.as_str())
    }
}

/// A blocked caller's handle, stored until exactly one resolver consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationRecord {
    pub key: ContinuationKey,
    pub token: ContinuationToken,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ContinuationRecord {
    pub fn new(job_id: JobId, token: ContinuationToken, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: ContinuationKey::for_job(job_id),
            token,
            inserted_at: now,
            expires_at: expiry(now, ttl),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.key.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_uses_job_id_literal() {
        let key = ContinuationKey::for_job(JobId::new());
        let json = serde_json::to_value(key).unwrap();
        assert_eq!(json["id_type"], "job_id");
    }

    #[test]
    fn record_expiry_follows_ttl() {
        let token = ContinuationToken::new("tok").unwrap();
        let record = ContinuationRecord::new(JobId::new(), token, Duration::from_secs(3600));
        assert_eq!(
            record.expires_at - record.inserted_at,
            chrono::Duration::hours(1)
        );
    }
}
