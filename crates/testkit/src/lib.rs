use std::collections::VecDeque;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use beacon_core::ids::{SpanId, TraceId};
use beacon_core::model::span::{AttributeValue, Span, SpanKind, SpanStatus};
use bytes::Bytes;
use chrono::{Duration, TimeZone, Utc};
use flate2::read::GzDecoder;

pub fn trace_id(n: u8) -> TraceId {
    let mut bytes = [0u8; 16];
    bytes[15] = n;
    bytes[0] = 0xab;
    TraceId::from_bytes(bytes)
}

pub fn span_id(n: u8) -> SpanId {
    let mut bytes = [0u8; 8];
    bytes[7] = n;
    SpanId::from_bytes(bytes)
}

/// A finished client span starting `start_us` microseconds after
/// 2026-02-01T00:00:00Z and lasting 1.5 ms.
pub fn sample_span(name: &str, start_us: i64) -> Span {
    let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let start = base + Duration::microseconds(start_us);
    let mut span = Span {
        trace_id: trace_id(1),
        span_id: span_id((start_us % 251) as u8),
        parent_span_id: None,
        name: name.to_string(),
        kind: SpanKind::Client,
        start_time: start,
        end_time: Some(start + Duration::microseconds(1_500)),
        attributes: Default::default(),
        events: Vec::new(),
        status: SpanStatus::Unset,
    };
    span.attributes
        .insert("http.method".to_string(), AttributeValue::from("GET"));
    span
}

pub fn sample_spans(n: usize) -> Vec<Span> {
    (0..n)
        .map(|i| sample_span(&format!("GET /items/{i}"), i as i64 * 1_000))
        .collect()
}

pub fn span_with_attr(name: &str, key: &str, value: impl Into<AttributeValue>) -> Span {
    let mut span = sample_span(name, 0);
    span.attributes.insert(key.to_string(), value.into());
    span
}

/// One request seen by [`FakeCollector`], with gzip bodies already inflated.
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub body: String,
}

impl ReceivedUpload {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

#[derive(Default)]
struct CollectorState {
    statuses: Mutex<VecDeque<u16>>,
    uploads: Mutex<Vec<ReceivedUpload>>,
}

/// Local HTTP collector answering scripted statuses, then 202.
pub struct FakeCollector {
    pub addr: SocketAddr,
    state: Arc<CollectorState>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeCollector {
    pub async fn start(statuses: &[u16]) -> anyhow::Result<Self> {
        let state = Arc::new(CollectorState::default());
        state.statuses.lock().unwrap().extend(statuses);

        let app = Router::new()
            .route("/v1/rum", post(receive))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, state, task })
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/v1/rum", self.addr)
    }

    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.state.uploads.lock().unwrap().clone()
    }

    /// Total spans across all upload bodies.
    pub fn span_count(&self) -> usize {
        self.uploads()
            .iter()
            .map(|u| u.json().as_array().map_or(0, Vec::len))
            .sum()
    }
}

impl Drop for FakeCollector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn receive(
    State(state): State<Arc<CollectorState>>,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let content_encoding = header("content-encoding");
    let body = if content_encoding.as_deref() == Some("gzip") {
        let mut out = String::new();
        GzDecoder::new(&body[..]).read_to_string(&mut out).unwrap();
        out
    } else {
        String::from_utf8_lossy(&body).into_owned()
    };

    state.uploads.lock().unwrap().push(ReceivedUpload {
        query: uri.query().map(str::to_string),
        content_type: header("content-type"),
        content_encoding,
        body,
    });
    let status = state.statuses.lock().unwrap().pop_front().unwrap_or(202);
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}
