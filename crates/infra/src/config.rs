//! Orchestrator configuration from environment variables.

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use fqdecomp_events::DEFAULT_EVENT_SOURCE;

use crate::layout::{ObjectLayout, DEFAULT_DATA_PREFIX, DEFAULT_METADATA_PREFIX};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_BUCKET: &str = "fastq-decompression-jobs";
pub const DEFAULT_TTL_DAYS: u64 = 7;

const DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub sweep_interval: Duration,
    /// Source id state-change events must carry.
    pub event_source: String,
    pub layout: ObjectLayout,
    pub job_ttl: Duration,
    pub continuation_ttl: Duration,
    /// How long a cleanly exited worker may go without a terminal event.
    pub completion_grace: Duration,
    /// Command line used to start a worker process.
    pub worker_command: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            event_source: DEFAULT_EVENT_SOURCE.to_string(),
            layout: ObjectLayout::new(DEFAULT_BUCKET),
            job_ttl: Duration::from_secs(DEFAULT_TTL_DAYS * DAY),
            continuation_ttl: Duration::from_secs(DEFAULT_TTL_DAYS * DAY),
            completion_grace: DEFAULT_SWEEP_INTERVAL,
            worker_command: None,
        }
    }
}

impl OrchestratorConfig {
    /// Read `FQDECOMP_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sweep_interval = match lookup("FQDECOMP_SWEEP_INTERVAL_SECS") {
            Some(v) => parse_span("FQDECOMP_SWEEP_INTERVAL_SECS", v, 1, false)?,
            None => defaults.sweep_interval,
        };
        let completion_grace = match lookup("FQDECOMP_COMPLETION_GRACE_SECS") {
            Some(v) => parse_span("FQDECOMP_COMPLETION_GRACE_SECS", v, 1, true)?,
            None => sweep_interval,
        };
        let job_ttl = match lookup("FQDECOMP_JOB_TTL_DAYS") {
            Some(v) => parse_span("FQDECOMP_JOB_TTL_DAYS", v, DAY, false)?,
            None => defaults.job_ttl,
        };
        let continuation_ttl = match lookup("FQDECOMP_CONTINUATION_TTL_DAYS") {
            Some(v) => parse_span("FQDECOMP_CONTINUATION_TTL_DAYS", v, DAY, false)?,
            None => defaults.continuation_ttl,
        };

        let layout = ObjectLayout {
            bucket: non_empty(&lookup, "FQDECOMP_BUCKET")?.unwrap_or(defaults.layout.bucket),
            data_prefix: non_empty(&lookup, "FQDECOMP_DATA_PREFIX")?
                .map(with_trailing_slash)
                .unwrap_or_else(|| DEFAULT_DATA_PREFIX.to_string()),
            metadata_prefix: non_empty(&lookup, "FQDECOMP_METADATA_PREFIX")?
                .map(with_trailing_slash)
                .unwrap_or_else(|| DEFAULT_METADATA_PREFIX.to_string()),
        };

        Ok(Self {
            sweep_interval,
            event_source: non_empty(&lookup, "FQDECOMP_EVENT_SOURCE")?
                .unwrap_or(defaults.event_source),
            layout,
            job_ttl,
            continuation_ttl,
            completion_grace,
            worker_command: non_empty(&lookup, "FQDECOMP_WORKER_COMMAND")?,
        })
    }

    pub fn require_worker_command(&self) -> Result<&str, ConfigError> {
        self.worker_command
            .as_deref()
            .ok_or(ConfigError::Missing("FQDECOMP_WORKER_COMMAND"))
    }
}

/// `value` counts of `unit_secs`. The span must fit a timestamp offset from now.
fn parse_span(
    key: &'static str,
    value: String,
    unit_secs: u64,
    allow_zero: bool,
) -> Result<Duration, ConfigError> {
    let span = value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|n| allow_zero || *n > 0)
        .and_then(|n| n.checked_mul(unit_secs))
        .map(Duration::from_secs)
        .filter(|span| {
            chrono::Duration::from_std(*span)
                .ok()
                .and_then(|span| Utc::now().checked_add_signed(span))
                .is_some()
        });
    span.ok_or(ConfigError::Invalid { key, value })
}

fn non_empty(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<String>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Err(ConfigError::Invalid { key, value: v }),
        Some(v) => Ok(Some(v.trim().to_string())),
    }
}

fn with_trailing_slash(mut prefix: String) -> String {
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.completion_grace, config.sweep_interval);
        assert_eq!(config.job_ttl, Duration::from_secs(7 * DAY));
        assert_eq!(config.layout.data_prefix, "decompression-data/");
        assert!(config.require_worker_command().is_err());
    }

    #[test]
    fn overrides_are_read() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("FQDECOMP_SWEEP_INTERVAL_SECS", "60"),
            ("FQDECOMP_BUCKET", "my-bucket"),
            ("FQDECOMP_METADATA_PREFIX", "meta"),
            ("FQDECOMP_CONTINUATION_TTL_DAYS", "1"),
            ("FQDECOMP_WORKER_COMMAND", "/usr/bin/worker --fast"),
        ]))
        .unwrap();

        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.completion_grace, Duration::from_secs(60));
        assert_eq!(config.layout.bucket, "my-bucket");
        assert_eq!(config.layout.metadata_prefix, "meta/");
        assert_eq!(config.continuation_ttl, Duration::from_secs(DAY));
        assert_eq!(
            config.require_worker_command().unwrap(),
            "/usr/bin/worker --fast"
        );
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = OrchestratorConfig::from_lookup(lookup(&[(
            "FQDECOMP_SWEEP_INTERVAL_SECS",
            "five",
        )]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "FQDECOMP_SWEEP_INTERVAL_SECS",
                value: "five".to_string()
            }
        );

        let err =
            OrchestratorConfig::from_lookup(lookup(&[("FQDECOMP_JOB_TTL_DAYS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FQDECOMP_JOB_TTL_DAYS", .. }));
    }

    #[test]
    fn spans_past_the_calendar_are_rejected() {
        for (key, value) in [
            ("FQDECOMP_JOB_TTL_DAYS", "100000000"),
            ("FQDECOMP_JOB_TTL_DAYS", "18446744073709551615"),
            ("FQDECOMP_CONTINUATION_TTL_DAYS", "100000000"),
            ("FQDECOMP_COMPLETION_GRACE_SECS", "18446744073709551615"),
            ("FQDECOMP_SWEEP_INTERVAL_SECS", "18446744073709551615"),
        ] {
            let err = OrchestratorConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert_eq!(
                err,
                ConfigError::Invalid {
                    key,
                    value: value.to_string()
                }
            );
        }
    }

    #[test]
    fn long_but_representable_ttl_is_accepted() {
        let config =
            OrchestratorConfig::from_lookup(lookup(&[("FQDECOMP_JOB_TTL_DAYS", "36500")])).unwrap();
        assert_eq!(config.job_ttl, Duration::from_secs(36_500 * DAY));
    }

    #[test]
    fn grace_may_be_zero() {
        let config =
            OrchestratorConfig::from_lookup(lookup(&[("FQDECOMP_COMPLETION_GRACE_SECS", "0")]))
                .unwrap();
        assert_eq!(config.completion_grace, Duration::ZERO);
    }
}
