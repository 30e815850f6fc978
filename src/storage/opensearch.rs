//! OpenSearch index sink.
//!
//! Each anomaly is a single `POST /{index}/_doc` request. No batching. Request
//! bodies are gzip-compressed when enabled; compression is a transport detail
//! and does not change what is stored.

use std::io::Write;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use url::Url;

use crate::error::Result;
use crate::models::{AnomalyDocument, IndexConfig};
use crate::storage::{AnomalySink, IndexOutcome};

/// Longest slice of a response body quoted in a failure reason.
const REASON_BODY_LIMIT: usize = 200;

/// OpenSearch-backed [`AnomalySink`].
#[derive(Debug, Clone)]
pub struct OpenSearchSink {
    client: Client,
    endpoint: Url,
    compress: bool,
}

impl OpenSearchSink {
    /// Create a sink for the configured host and index.
    pub fn new(client: Client, config: &IndexConfig) -> Result<Self> {
        Self::with_base_url(client, config.base_url()?, &config.index, config.compress)
    }

    /// Create a sink against an explicit base URL.
    pub fn with_base_url(client: Client, base: Url, index: &str, compress: bool) -> Result<Self> {
        let base = if base.path().ends_with('/') {
            base
        } else {
            Url::parse(&format!("{base}/"))?
        };
        let endpoint = base.join(&format!("{index}/_doc"))?;
        Ok(Self {
            client,
            endpoint,
            compress,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AnomalySink for OpenSearchSink {
    async fn index(&self, document: &AnomalyDocument) -> IndexOutcome {
        let body = match serde_json::to_vec(document) {
            Ok(body) => body,
            Err(e) => return IndexOutcome::Permanent(format!("unserializable document: {e}")),
        };

        let request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json");

        let request = if self.compress {
            match gzip(&body) {
                Ok(compressed) => request.header(CONTENT_ENCODING, "gzip").body(compressed),
                Err(e) => {
                    log::warn!("gzip failed, sending uncompressed: {e}");
                    request.body(body)
                }
            }
        } else {
            request.body(body)
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return IndexOutcome::Transient(describe_send_error(&e)),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if status.is_success() => {
                log::debug!("Could not read index response body: {e}");
                String::new()
            }
            Err(e) => return IndexOutcome::Transient(format!("HTTP {status}: {e}")),
        };

        outcome_for_response(status, &text)
    }
}

fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

fn describe_send_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("request timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    }
}

/// Map an HTTP response to an outcome.
///
/// 2xx is accepted; 408, 429 and 5xx are worth retrying; every other status
/// means the store refused the document.
pub fn outcome_for_response(status: StatusCode, body: &str) -> IndexOutcome {
    if status.is_success() {
        let id = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("_id").and_then(|id| id.as_str()).map(String::from));
        return IndexOutcome::Accepted { id };
    }

    let reason = format!("HTTP {}: {}", status.as_u16(), truncate(body, REASON_BODY_LIMIT));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        IndexOutcome::Transient(reason)
    } else {
        IndexOutcome::Permanent(reason)
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
