//! Object-store layout shared with the worker.
//!
//! Job output lands under the data prefix (short retention) and result metadata
//! under the metadata prefix (long retention), both partitioned by date and job:
//!
//! ```text
//! s3://{bucket}/{data_prefix}year=2025/month=03/day=07/{job_id}/
//! s3://{bucket}/{metadata_prefix}year=2025/month=03/day=07/{job_id}/
//! ```

use chrono::{DateTime, Datelike, Utc};

use fqdecomp_core::JobId;

pub const DEFAULT_DATA_PREFIX: &str = "decompression-data/";
pub const DEFAULT_METADATA_PREFIX: &str = "metadata/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    pub bucket: String,
    pub data_prefix: String,
    pub metadata_prefix: String,
}

impl ObjectLayout {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            data_prefix: DEFAULT_DATA_PREFIX.to_string(),
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
        }
    }

    /// Key prefix (no scheme or bucket) for a job's metadata.
    pub fn metadata_key_prefix(&self, job_id: JobId, at: DateTime<Utc>) -> String {
        format!("{}{}{}/", self.metadata_prefix, partition(at), job_id)
    }

    /// Full URI of a job's metadata prefix; the success result reference.
    pub fn metadata_uri(&self, job_id: JobId, at: DateTime<Utc>) -> String {
        format!("s3://{}/{}", self.bucket, self.metadata_key_prefix(job_id, at))
    }

    /// Default output location when the request did not supply one.
    pub fn output_uri_prefix(&self, job_id: JobId, at: DateTime<Utc>) -> String {
        format!(
            "s3://{}/{}{}{}/",
            self.bucket,
            self.data_prefix,
            partition(at),
            job_id
        )
    }
}

fn partition(at: DateTime<Utc>) -> String {
    format!(
        "year={}/month={:02}/day={:02}/",
        at.year(),
        at.month(),
        at.day()
    )
}
