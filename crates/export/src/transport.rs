use std::future::Future;
use std::io::Write;
use std::time::Duration;

use beacon_core::config::Compression;
use bytes::Bytes;
use flate2::write::GzEncoder;
use reqwest::Client;

/// One POST of an upload body. Implementations return the HTTP status of
/// any response they receive; only a missing response is an error.
///
/// The body is sent as given. `content_encoding` names the encoding it
/// already carries, if any.
pub trait Transport: Send + Sync {
    fn post(
        &self,
        url: &str,
        body: Bytes,
        content_encoding: Option<&'static str>,
    ) -> impl Future<Output = Result<u16, TransportError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Other(String),
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = ?e, "failed to build upload http client; using defaults");
                Client::new()
            });
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        body: Bytes,
        content_encoding: Option<&'static str>,
    ) -> Result<u16, TransportError> {
        let mut req = self
            .client
            .post(url)
            .header("content-type", "application/json");
        if let Some(encoding) = content_encoding {
            req = req.header("content-encoding", encoding);
        }

        match req.body(body).send().await {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(e) if e.is_timeout() => Err(TransportError::Timeout),
            Err(e) if e.is_connect() => Err(TransportError::Connect(e.to_string())),
            Err(e) => Err(TransportError::Other(e.to_string())),
        }
    }
}

pub(crate) fn maybe_compress_body(
    body: Bytes,
    compression: Compression,
) -> std::io::Result<(Bytes, Option<&'static str>)> {
    match compression {
        Compression::None => Ok((body, None)),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&body)?;
            let compressed = encoder.finish()?;
            Ok((Bytes::from(compressed), Some("gzip")))
        }
    }
}
