//! Collector wire format.
//!
//! Each span is encoded once at ingest time into a JSON object and stored as
//! text. An upload body is a JSON array built by concatenating stored rows,
//! so spans are never decoded again on the export path. Field names and their
//! order are part of the collector contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BeaconError, Result};
use crate::model::span::{AttributeValue, Span, SpanKind, SpanStatus};
use crate::time::unix_micros;

pub const LOCAL_SERVICE_NAME: &str = "app";
pub const STATUS_CODE_TAG: &str = "otel.status_code";
pub const ERROR_TAG: &str = "error";

/// Bytes added by the surrounding `[` and `]` of a batch body.
pub const ARRAY_OVERHEAD: usize = 2;

/// Attribute keys that name the remote peer of client/producer spans,
/// lower value wins.
const REMOTE_SERVICE_KEYS: &[(&str, u8)] = &[
    ("peer.service", 0),
    ("net.peer.name", 1),
    ("peer.hostname", 2),
    ("peer.address", 2),
    ("http.host", 3),
    ("db.instance", 4),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireSpan {
    pub trace_id: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    pub local_endpoint: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<Endpoint>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    pub timestamp: i64,
    pub value: String,
}

impl WireSpan {
    pub fn from_span(span: &Span) -> Self {
        let mut tags = BTreeMap::new();
        let mut remote: Option<(u8, &str)> = None;

        for (key, value) in &span.attributes {
            if let AttributeValue::String(s) = value
                && let Some(priority) = remote_service_priority(key)
                && remote.is_none_or(|(best, _)| priority < best)
            {
                remote = Some((priority, s.as_str()));
            }
            tags.insert(key.clone(), value.to_string());
        }

        match &span.status {
            SpanStatus::Unset => {}
            SpanStatus::Ok => {
                tags.insert(STATUS_CODE_TAG.to_string(), "OK".to_string());
            }
            SpanStatus::Error { description } => {
                tags.insert(STATUS_CODE_TAG.to_string(), "ERROR".to_string());
                tags.insert(ERROR_TAG.to_string(), description.clone());
            }
        }

        let remote_endpoint = match span.kind {
            SpanKind::Client | SpanKind::Producer => remote.map(|(_, name)| Endpoint {
                service_name: name.to_string(),
            }),
            _ => None,
        };

        Self {
            trace_id: span.trace_id.to_hex(),
            id: span.span_id.to_hex(),
            parent_id: span.parent_span_id.map(|id| id.to_hex()),
            kind: kind_label(span.kind).map(str::to_string),
            name: span.name.clone(),
            timestamp: unix_micros(span.start_time),
            duration: span
                .duration()
                .map(|d| d.num_microseconds().unwrap_or(i64::MAX)),
            local_endpoint: Endpoint {
                service_name: LOCAL_SERVICE_NAME.to_string(),
            },
            remote_endpoint,
            annotations: span
                .events
                .iter()
                .map(|event| Annotation {
                    timestamp: unix_micros(event.timestamp),
                    value: event.name.clone(),
                })
                .collect(),
            tags,
        }
    }
}

pub fn encode_span(span: &Span) -> Result<String> {
    serde_json::to_string(&WireSpan::from_span(span))
        .map_err(|e| BeaconError::Encode(format!("failed to encode span {}: {e}", span.span_id)))
}

/// Joins pre-encoded span objects into one JSON array body.
pub fn join_payloads<'a, I>(payloads: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut body = String::from("[");
    for (i, payload) in payloads.into_iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        body.push_str(payload);
    }
    body.push(']');
    body
}

fn remote_service_priority(key: &str) -> Option<u8> {
    REMOTE_SERVICE_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, priority)| *priority)
}

fn kind_label(kind: SpanKind) -> Option<&'static str> {
    match kind {
        SpanKind::Client => Some("CLIENT"),
        SpanKind::Server => Some("SERVER"),
        SpanKind::Producer => Some("PRODUCER"),
        SpanKind::Consumer => Some("CONSUMER"),
        SpanKind::Internal => None,
    }
}
