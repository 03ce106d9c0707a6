//! Event Router: classifies bus events into orchestration routes.
//!
//! Classification is purely structural. A request is recognised by its detail type
//! (which fixes job kind and flavor), the presence of `taskToken` for the sync flavor
//! and the presence of `fastqIdList` or `fastqSetIdList` under `payload`. State
//! changes must carry the configured source plus `id` and `status`. Nothing here
//! touches a store.

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use fqdecomp_core::{
    ContinuationToken, DomainError, Flavor, JobKind, JobOptions, JobPayload, JobRequest,
    StateChangeEvent,
};

use crate::BusEvent;

pub const STATE_CHANGE_DETAIL_TYPE: &str = "DecompressionJobStateChange";
pub const SWEEP_TICK_DETAIL_TYPE: &str = "HeartbeatSweepTick";
pub const DEFAULT_EVENT_SOURCE: &str = "orcabus.fastqdecompression";

/// One of the eight inbound request classes (4 kinds x 2 flavors).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RequestClass {
    pub kind: JobKind,
    pub flavor: Flavor,
}

impl RequestClass {
    pub fn all() -> impl Iterator<Item = RequestClass> {
        JobKind::ALL.into_iter().flat_map(|kind| {
            [Flavor::Sync, Flavor::Async]
                .into_iter()
                .map(move |flavor| RequestClass { kind, flavor })
        })
    }

    /// Detail type a requester publishes for this class.
    pub fn detail_type(&self) -> &'static str {
        match (self.kind, self.flavor) {
            (JobKind::OraDecompression, Flavor::Sync) => "OraDecompressionRequestSync",
            (JobKind::OraDecompression, Flavor::Async) => "OraDecompressionRequest",
            (JobKind::GzipFileSizeCalculation, Flavor::Sync) => {
                "GzipFileSizeCalculationRequestSync"
            }
            (JobKind::GzipFileSizeCalculation, Flavor::Async) => "GzipFileSizeCalculationRequest",
            (JobKind::RawMd5sumCalculation, Flavor::Sync) => {
                "OraToRawMd5sumCalculationRequestSync"
            }
            (JobKind::RawMd5sumCalculation, Flavor::Async) => "OraToRawMd5sumCalculationRequest",
            (JobKind::ReadCountCalculation, Flavor::Sync) => "ReadCountCalculationRequestSync",
            (JobKind::ReadCountCalculation, Flavor::Async) => "ReadCountCalculationRequest",
        }
    }

    pub fn from_detail_type(detail_type: &str) -> Option<RequestClass> {
        Self::all().find(|c| c.detail_type() == detail_type)
    }
}

/// Where a classified event goes next.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// New job request, bound for the Dispatch Stage.
    Admit(JobRequest),
    /// Scheduled tick, bound for the Liveness Monitor.
    Sweep,
    /// Worker notification, bound for the Completion Stage.
    StateChange(StateChangeEvent),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The event does not match any rule; not ours to handle.
    #[error("unmatched event '{detail_type}': {reason}")]
    Unmatched {
        detail_type: String,
        reason: &'static str,
    },

    /// The event matched a rule but its content is unusable.
    #[error("malformed '{detail_type}' event: {source}")]
    Malformed {
        detail_type: String,
        #[source]
        source: DomainError,
    },
}

impl RouteError {
    fn unmatched(event: &BusEvent, reason: &'static str) -> Self {
        RouteError::Unmatched {
            detail_type: event.detail_type().to_string(),
            reason,
        }
    }

    fn malformed(event: &BusEvent, source: DomainError) -> Self {
        RouteError::Malformed {
            detail_type: event.detail_type().to_string(),
            source,
        }
    }
}

/// Pattern-based classifier for bus events.
#[derive(Debug, Clone)]
pub struct EventRouter {
    source: String,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_SOURCE)
    }
}

impl EventRouter {
    /// `source` is the fixed source id state changes and sweep ticks must carry.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Build the internally generated sweep tick.
    pub fn sweep_tick(&self) -> BusEvent {
        BusEvent::new(SWEEP_TICK_DETAIL_TYPE, self.source.clone(), JsonValue::Null)
    }

    /// Build a state-change event as the worker would emit it.
    pub fn state_change(&self, event: &StateChangeEvent) -> BusEvent {
        let detail = serde_json::to_value(event).unwrap_or(JsonValue::Null);
        BusEvent::new(STATE_CHANGE_DETAIL_TYPE, self.source.clone(), detail)
    }

    pub fn classify(&self, event: &BusEvent) -> Result<Route, RouteError> {
        let route = match event.detail_type() {
            STATE_CHANGE_DETAIL_TYPE => self.classify_state_change(event),
            SWEEP_TICK_DETAIL_TYPE => {
                if event.source() == self.source {
                    Ok(Route::Sweep)
                } else {
                    Err(RouteError::unmatched(event, "sweep tick from foreign source"))
                }
            }
            other => match RequestClass::from_detail_type(other) {
                Some(class) => classify_request(class, event),
                None => Err(RouteError::unmatched(event, "unknown detail type")),
            },
        };

        if let Err(ref e) = route {
            debug!(event_id = %event.id(), error = %e, "event not routed");
        }
        route
    }

    fn classify_state_change(&self, event: &BusEvent) -> Result<Route, RouteError> {
        if event.source() != self.source {
            return Err(RouteError::unmatched(event, "state change from foreign source"));
        }
        let detail = event.detail();
        if detail.get("id").is_none() || detail.get("status").is_none() {
            return Err(RouteError::unmatched(event, "state change without id/status"));
        }

        let state_change: StateChangeEvent = serde_json::from_value(detail.clone())
            .map_err(|e| RouteError::malformed(event, DomainError::validation(e.to_string())))?;

        let state_change = match detail.get("status").and_then(JsonValue::as_str) {
            Some("ABORTED") if state_change.detail.is_none() => state_change.with_detail("aborted"),
            _ => state_change,
        };

        Ok(Route::StateChange(state_change))
    }
}

fn classify_request(class: RequestClass, event: &BusEvent) -> Result<Route, RouteError> {
    let detail = event.detail();

    let continuation = match (class.flavor, detail.get("taskToken")) {
        (Flavor::Sync, Some(JsonValue::String(token))) => Some(
            ContinuationToken::new(token.clone()).map_err(|e| RouteError::malformed(event, e))?,
        ),
        (Flavor::Sync, _) => {
            return Err(RouteError::unmatched(event, "sync request without taskToken"));
        }
        (Flavor::Async, _) => None,
    };

    let Some(payload) = detail.get("payload") else {
        return Err(RouteError::unmatched(event, "request without payload"));
    };

    let ids = |field: &str| -> Result<Option<Vec<String>>, RouteError> {
        match payload.get(field) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| {
                    RouteError::malformed(event, DomainError::validation(format!("{field}: {e}")))
                }),
        }
    };

    let job_payload = match (ids("fastqIdList")?, ids("fastqSetIdList")?) {
        (Some(list), _) => JobPayload::FastqIdList(list),
        (None, Some(list)) => JobPayload::FastqSetIdList(list),
        (None, None) => {
            return Err(RouteError::unmatched(
                event,
                "payload has neither fastqIdList nor fastqSetIdList",
            ));
        }
    };
    job_payload
        .validate()
        .map_err(|e| RouteError::malformed(event, e))?;

    let options: JobOptions = serde_json::from_value(payload.clone())
        .map_err(|e| RouteError::malformed(event, DomainError::validation(e.to_string())))?;

    Ok(Route::Admit(JobRequest {
        kind: class.kind,
        payload: job_payload,
        options,
        continuation,
    }))
}
