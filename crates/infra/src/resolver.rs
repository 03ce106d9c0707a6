//! Continuation resolution: resuming (or failing) a blocked synchronous caller.
//!
//! A resolver redeems a [`ContinuationToken`]. Callers only reach it after taking the
//! continuation record out of the store, so within this process a token is resolved
//! at most once; the in-memory resolver still rejects a second redemption the way a
//! real task-token service would.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{mpsc, Mutex};

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use fqdecomp_core::{ContinuationToken, JobRecord};

/// Error name reported when the worker reported failure.
pub const JOB_FAILED_ERROR: &str = "DecompressionJobFailed";
/// Error name reported when the worker disappeared without a terminal event.
pub const WORKER_LOST_ERROR: &str = "WorkerLost";
/// Error name used when the worker could not be started.
pub const DISPATCH_FAILED_ERROR: &str = "DispatchFailed";

/// Value handed back to the blocked caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Success { output: JsonValue },
    Failure { error: String, cause: String },
}

impl Resolution {
    /// Success result for a finished job: its id and result reference.
    pub fn succeeded(record: &JobRecord, output: Option<&JsonValue>) -> Self {
        let mut body = json!({
            "jobId": record.id,
            "status": "SUCCEEDED",
            "outputUriPrefix": record.output_uri_prefix,
            "metadataUri": record.metadata_uri,
        });
        if let Some(output) = output {
            body["output"] = output.clone();
        }
        Resolution::Success { output: body }
    }

    pub fn failed(error: impl Into<String>, cause: impl Into<String>) -> Self {
        Resolution::Failure {
            error: error.into(),
            cause: cause.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Resolution::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("continuation token is unknown or already redeemed")]
    InvalidToken,
    #[error("failed to deliver resolution: {0}")]
    Delivery(String),
}

pub trait ContinuationResolver: Send + Sync {
    fn resolve(
        &self,
        token: &ContinuationToken,
        resolution: Resolution,
    ) -> Result<(), ResolveError>;

    /// Liveness signal that keeps the caller's wait alive.
    fn heartbeat(&self, token: &ContinuationToken) -> Result<(), ResolveError>;
}

#[derive(Debug, Default)]
struct Slot {
    resolutions: Vec<Resolution>,
    heartbeats: usize,
    waiter: Option<mpsc::Sender<Resolution>>,
}

/// Resolver that keeps every redemption in memory, for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryResolver {
    slots: Mutex<HashMap<ContinuationToken, Slot>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block-style waiter for a token: receives the resolution once it arrives.
    pub fn wait_for(&self, token: &ContinuationToken) -> mpsc::Receiver<Resolution> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut slots) = self.slots.lock() {
            let slot = slots.entry(token.clone()).or_default();
            match slot.resolutions.first() {
                Some(done) => {
                    let _ = tx.send(done.clone());
                }
                None => slot.waiter = Some(tx),
            }
        }
        rx
    }

    /// Every resolution attempted for `token`, accepted or not.
    pub fn resolutions(&self, token: &ContinuationToken) -> Vec<Resolution> {
        self.slots
            .lock()
            .ok()
            .and_then(|s| s.get(token).map(|slot| slot.resolutions.clone()))
            .unwrap_or_default()
    }

    pub fn heartbeats(&self, token: &ContinuationToken) -> usize {
        self.slots
            .lock()
            .ok()
            .and_then(|s| s.get(token).map(|slot| slot.heartbeats))
            .unwrap_or(0)
    }

    /// Total resolutions across all tokens.
    pub fn resolution_count(&self) -> usize {
        self.slots
            .lock()
            .map(|s| s.values().map(|slot| slot.resolutions.len()).sum())
            .unwrap_or(0)
    }
}

impl ContinuationResolver for InMemoryResolver {
    fn resolve(
        &self,
        token: &ContinuationToken,
        resolution: Resolution,
    ) -> Result<(), ResolveError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| ResolveError::Delivery("lock poisoned".to_string()))?;
        let slot = slots.entry(token.clone()).or_default();
        slot.resolutions.push(resolution.clone());
        if slot.resolutions.len() > 1 {
            return Err(ResolveError::InvalidToken);
        }
        if let Some(waiter) = slot.waiter.take() {
            let _ = waiter.send(resolution);
        }
        Ok(())
    }

    fn heartbeat(&self, token: &ContinuationToken) -> Result<(), ResolveError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| ResolveError::Delivery("lock poisoned".to_string()))?;
        let slot = slots.entry(token.clone()).or_default();
        if !slot.resolutions.is_empty() {
            return Err(ResolveError::InvalidToken);
        }
        slot.heartbeats += 1;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ResolverMessage<'a> {
    #[serde(rename_all = "camelCase")]
    TaskSuccess {
        task_token: &'a str,
        output: &'a JsonValue,
    },
    #[serde(rename_all = "camelCase")]
    TaskFailure {
        task_token: &'a str,
        error: &'a str,
        cause: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    TaskHeartbeat { task_token: &'a str },
}

/// Writes each resolution as one JSON line to `W` (stdout in the service).
#[derive(Debug)]
pub struct JsonLinesResolver<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesResolver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.out.into_inner().ok()
    }

    fn emit(&self, message: &ResolverMessage<'_>) -> Result<(), ResolveError> {
        let line =
            serde_json::to_string(message).map_err(|e| ResolveError::Delivery(e.to_string()))?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| ResolveError::Delivery("writer lock poisoned".to_string()))?;
        writeln!(out, "{line}").map_err(|e| ResolveError::Delivery(e.to_string()))?;
        out.flush()
            .map_err(|e| ResolveError::Delivery(e.to_string()))
    }
}

impl<W: Write + Send> ContinuationResolver for JsonLinesResolver<W> {
    fn resolve(
        &self,
        token: &ContinuationToken,
        resolution: Resolution,
    ) -> Result<(), ResolveError> {
        let task_token = token.as_str();
        match &resolution {
            Resolution::Success { output } => {
                self.emit(&ResolverMessage::TaskSuccess { task_token, output })
            }
            Resolution::Failure { error, cause } => self.emit(&ResolverMessage::TaskFailure {
                task_token,
                error,
                cause,
            }),
        }
    }

    fn heartbeat(&self, token: &ContinuationToken) -> Result<(), ResolveError> {
        self.emit(&ResolverMessage::TaskHeartbeat {
            task_token: token.as_str(),
        })
    }
}
