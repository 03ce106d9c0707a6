use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Envelope for everything that travels over the bus.
///
/// Shape mirrors an EventBridge-style event: routing happens on `detail_type`,
/// `source` and the structure of `detail`; the payload itself stays untyped until
/// the router classifies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    #[serde(default = "Uuid::now_v7")]
    id: Uuid,
    #[serde(alias = "detail-type")]
    detail_type: String,
    #[serde(default)]
    source: String,
    #[serde(default = "Utc::now")]
    time: DateTime<Utc>,
    #[serde(default)]
    detail: JsonValue,
}

impl BusEvent {
    pub fn new(detail_type: impl Into<String>, source: impl Into<String>, detail: JsonValue) -> Self {
        Self {
            id: Uuid::now_v7(),
            detail_type: detail_type.into(),
            source: source.into(),
            time: Utc::now(),
            detail,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn detail_type(&self) -> &str {
        &self.detail_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn detail(&self) -> &JsonValue {
        &self.detail
    }

    pub fn into_detail(self) -> JsonValue {
        self.detail
    }
}
