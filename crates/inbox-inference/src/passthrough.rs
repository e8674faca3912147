//! Oracle that keeps every mail body as a single message.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;

use inbox_core::defaults;
use inbox_core::{Error, ExtractedMessages, ExtractionOracle, Message, OracleRequest, Result};

/// Extraction oracle for deployments without an HTTP oracle.
///
/// Masked blocks are replaced by a newline and never reported back, so the
/// stored message is the body with quoted history cut out.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughOracle;

impl PassthroughOracle {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExtractionOracle for PassthroughOracle {
    fn placeholder(&self) -> &str {
        "\n"
    }

    fn is_placeholder(&self, _content: &str) -> bool {
        false
    }

    async fn extract(
        &self,
        request: &OracleRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractedMessages> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled("passthrough extraction".to_string()));
        }
        let timestamp =
            NaiveDateTime::parse_from_str(&request.timestamp, defaults::ORACLE_TIMESTAMP_FORMAT)
                .ok()
                .map(|naive| naive.and_utc())
                .or_else(|| Some(Utc::now()));
        Ok(ExtractedMessages {
            messages: vec![Message {
                author: request.author.clone(),
                timestamp,
                content: request.conversation.clone(),
            }],
            forwarded: false,
            forwarded_by: None,
        })
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}
