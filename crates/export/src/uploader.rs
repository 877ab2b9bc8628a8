use std::time::Duration;

use beacon_core::config::Compression;
use beacon_core::error::BeaconError;
use beacon_core::model::record::PersistedSpanRecord;
use beacon_core::wire::{ARRAY_OVERHEAD, join_payloads};
use bytes::Bytes;
use reqwest::Url;

use crate::transport::{Transport, maybe_compress_body};

/// Result of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// 2xx.
    Accepted(u16),
    /// The collector will never take this body; retrying cannot help.
    Rejected(u16),
    Retry(String),
}

impl UploadOutcome {
    pub fn is_safe_to_delete(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::Rejected(_))
    }
}

pub fn classify_status(status: u16) -> UploadOutcome {
    match status {
        200..=299 => UploadOutcome::Accepted(status),
        400 | 406 | 413 | 422 => UploadOutcome::Rejected(status),
        other => UploadOutcome::Retry(format!("collector answered {other}")),
    }
}

/// Upload URL with the auth token as the `auth` query pair.
pub fn build_upload_url(
    endpoint: &str,
    auth_token: Option<&str>,
    allow_insecure: bool,
) -> beacon_core::Result<String> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| BeaconError::Config(format!("bad endpoint {endpoint}: {e}")))?;

    match url.scheme() {
        "https" => {}
        "http" if allow_insecure => {}
        "http" => {
            return Err(BeaconError::Config(format!(
                "refusing plaintext endpoint {endpoint}; set allow_insecure_endpoint to use it"
            )));
        }
        other => {
            return Err(BeaconError::Config(format!(
                "unsupported endpoint scheme {other}"
            )));
        }
    }

    if let Some(token) = auth_token.filter(|t| !t.is_empty()) {
        url.query_pairs_mut().append_pair("auth", token);
    }
    Ok(url.into())
}

/// A request body assembled from the head of the store.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Payload {
    pub body: String,
    /// Rows whose payloads are in `body`, in order.
    pub ids: Vec<i64>,
    /// Head rows too large to fit even alone.
    pub oversized: Vec<i64>,
}

impl Payload {
    /// Packs rows in order until the next one would push the body past
    /// `max_bytes`. Rows after that point are left for a later cycle.
    pub fn build(records: &[PersistedSpanRecord], max_bytes: usize) -> Self {
        let mut ids = Vec::with_capacity(records.len());
        let mut included = Vec::with_capacity(records.len());
        let mut oversized = Vec::new();
        let mut total = ARRAY_OVERHEAD;

        for record in records {
            let len = record.payload_len();
            if ids.is_empty() && len + ARRAY_OVERHEAD > max_bytes {
                oversized.push(record.id);
                continue;
            }
            let separator = usize::from(!ids.is_empty());
            if total + separator + len > max_bytes {
                break;
            }
            total += separator + len;
            ids.push(record.id);
            included.push(record.payload.as_str());
        }

        Self {
            body: join_payloads(included),
            ids,
            oversized,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One finished upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub outcome: UploadOutcome,
    /// Body size after content encoding, which is what the transport sent.
    pub wire_bytes: usize,
}

pub struct ExportUploader<T> {
    transport: T,
    url: String,
    timeout: Duration,
    compression: Compression,
}

impl<T: Transport> ExportUploader<T> {
    pub fn new(transport: T, url: String, timeout: Duration) -> Self {
        Self {
            transport,
            url,
            timeout,
            compression: Compression::None,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn upload(&self, body: Bytes) -> Upload {
        let raw_bytes = body.len();
        let (body, content_encoding) = match maybe_compress_body(body, self.compression) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = ?e, bytes = raw_bytes, "failed to compress upload, will retry");
                return Upload {
                    outcome: UploadOutcome::Retry(format!("failed to compress body: {e}")),
                    wire_bytes: 0,
                };
            }
        };
        let bytes = body.len();

        let sent = self.transport.post(&self.url, body, content_encoding);
        let outcome = match tokio::time::timeout(self.timeout, sent).await {
            Ok(Ok(status)) => {
                let outcome = classify_status(status);
                match &outcome {
                    UploadOutcome::Accepted(_) => {
                        tracing::debug!(status, bytes, raw_bytes, "upload accepted");
                    }
                    UploadOutcome::Rejected(_) => {
                        tracing::warn!(status, bytes, "collector rejected upload, dropping batch");
                    }
                    UploadOutcome::Retry(_) => {
                        tracing::warn!(status, bytes, "upload failed, will retry");
                    }
                }
                outcome
            }
            Ok(Err(e)) => {
                tracing::warn!(error = ?e, bytes, "upload transport error, will retry");
                UploadOutcome::Retry(e.to_string())
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, bytes, "upload timed out, will retry");
                UploadOutcome::Retry("upload timed out".to_string())
            }
        };
        Upload {
            outcome,
            wire_bytes: bytes,
        }
    }
}
