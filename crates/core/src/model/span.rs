use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SpanId, TraceId};

/// A completed span as handed over by instrumentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    #[serde(default)]
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    #[serde(default)]
    pub status: SpanStatus,
}

impl Span {
    /// Elapsed time between start and end, clamped at zero.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time
            .map(|end| (end - self.start_time).max(chrono::Duration::zero()))
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "code", rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error {
        #[serde(default)]
        description: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn span_at(start_ms: i64, end_ms: Option<i64>) -> Span {
        Span {
            trace_id: TraceId::from_bytes([1; 16]),
            span_id: SpanId::from_bytes([2; 8]),
            parent_span_id: None,
            name: "op".into(),
            kind: SpanKind::Internal,
            start_time: Utc.timestamp_millis_opt(start_ms).unwrap(),
            end_time: end_ms.map(|ms| Utc.timestamp_millis_opt(ms).unwrap()),
            attributes: BTreeMap::new(),
            events: vec![],
            status: SpanStatus::Unset,
        }
    }

    #[test]
    fn duration_never_negative() {
        assert_eq!(
            span_at(1_000, Some(1_250)).duration(),
            Some(chrono::Duration::milliseconds(250))
        );
        assert_eq!(
            span_at(1_000, Some(900)).duration(),
            Some(chrono::Duration::zero())
        );
        assert_eq!(span_at(1_000, None).duration(), None);
    }

    #[test]
    fn attribute_values_render_plainly() {
        assert_eq!(AttributeValue::from(true).to_string(), "true");
        assert_eq!(AttributeValue::from(42i64).to_string(), "42");
        assert_eq!(AttributeValue::from(1.5f64).to_string(), "1.5");
        assert_eq!(AttributeValue::from("GET").to_string(), "GET");
    }

    #[test]
    fn deserializes_producer_json() {
        let raw = r#"{
            "traceId": "4bf92f3577b34da6a3ce929d0e0e4736",
            "spanId": "00f067aa0ba902b7",
            "name": "AppStart",
            "kind": "client",
            "startTime": "2026-02-01T00:00:00Z",
            "endTime": "2026-02-01T00:00:01Z",
            "attributes": {"component": "appstart", "retries": 2, "cold": true, "ratio": 0.5},
            "status": {"code": "error", "description": "boom"}
        }"#;
        let span: Span = serde_json::from_str(raw).unwrap();
        assert_eq!(span.kind, SpanKind::Client);
        assert_eq!(span.attribute("retries"), Some(&AttributeValue::Int(2)));
        assert_eq!(span.attribute("cold"), Some(&AttributeValue::Bool(true)));
        assert_eq!(span.attribute("ratio"), Some(&AttributeValue::Double(0.5)));
        assert_eq!(
            span.status,
            SpanStatus::Error {
                description: "boom".into()
            }
        );
        assert!(span.events.is_empty());
    }
}
