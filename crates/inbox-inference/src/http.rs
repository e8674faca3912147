//! HTTP extraction oracle.
//!
//! Posts the masked conversation to `<url>/parse_messages` and reads back the
//! extracted messages as JSON.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use inbox_core::config::OracleConfig;
use inbox_core::defaults;
use inbox_core::{Error, ExtractedMessages, ExtractionOracle, Message, OracleRequest, Result};

/// Placeholder the HTTP oracle is prompted to echo for masked blocks.
pub const HTTP_PLACEHOLDER: &str = "\n\n=== PLACEHOLDER ===\n\n";

/// Extraction oracle backed by an HTTP service.
pub struct HttpOracle {
    client: Client,
    base_url: String,
    timeout: Duration,
}

/// Response body of `parse_messages`. Timestamps are kept as strings because
/// the service emits them with or without an offset.
#[derive(Debug, Deserialize)]
struct ParseMessagesResponse {
    messages: Option<Vec<RawMessage>>,
    #[serde(default)]
    forwarded: bool,
    #[serde(default)]
    forwarded_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl HttpOracle {
    /// Create an oracle for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build oracle HTTP client: {}", e)))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(
            subsystem = "oracle",
            component = "http_oracle",
            url = %base_url,
            timeout_secs = timeout.as_secs(),
            "Initializing HTTP oracle"
        );
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        Self::new(config.url.clone(), config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url, defaults::ORACLE_ENDPOINT)
    }

    async fn request(&self, request: &OracleRequest) -> Result<ExtractedMessages> {
        let response = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Oracle(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Oracle(format!("status {}: {}", status, body)));
        }

        let parsed: ParseMessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::Oracle(format!("unparsable response: {}", e)))?;
        let raw = parsed
            .messages
            .ok_or_else(|| Error::Oracle("response has no message list".to_string()))?;

        Ok(ExtractedMessages {
            messages: raw
                .into_iter()
                .map(|m| Message {
                    author: m.author.unwrap_or_default(),
                    timestamp: m.timestamp.as_deref().and_then(parse_timestamp),
                    content: m.content.unwrap_or_default(),
                })
                .collect(),
            forwarded: parsed.forwarded,
            forwarded_by: parsed.forwarded_by.filter(|by| !by.is_empty()),
        })
    }
}

/// Parse an oracle timestamp: RFC 3339, or a naive `%Y-%m-%dT%H:%M[:%S]`
/// taken as UTC. Anything else is dropped.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl ExtractionOracle for HttpOracle {
    fn placeholder(&self) -> &str {
        HTTP_PLACEHOLDER
    }

    #[instrument(
        skip(self, request, cancel),
        fields(
            subsystem = "oracle",
            component = "http_oracle",
            op = "extract",
            body_len = request.conversation.len(),
            reply_candidate = request.reply_candidate,
            forward_candidate = request.forward_candidate
        )
    )]
    async fn extract(
        &self,
        request: &OracleRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractedMessages> {
        let start = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled("oracle request".to_string()));
            }
            result = self.request(request) => result,
        };
        let elapsed = start.elapsed().as_millis() as u64;

        match &result {
            Ok(extracted) => {
                debug!(
                    result_count = extracted.messages.len(),
                    forwarded = extracted.forwarded,
                    duration_ms = elapsed,
                    "Oracle extraction complete"
                );
                if elapsed > defaults::ORACLE_SLOW_MS {
                    warn!(duration_ms = elapsed, slow = true, "Slow oracle request");
                }
            }
            Err(e) => warn!(error = %e, duration_ms = elapsed, "Oracle extraction failed"),
        }
        result
    }

    fn name(&self) -> &str {
        "http"
    }
}
