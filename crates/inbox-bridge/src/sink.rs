//! Notification sinks.
//!
//! [`WebhookSink`] hands every notification to an external chat relay as a
//! JSON POST. The relay answers with the chat message id it created:
//!
//! ```text
//! POST <webhook_url>
//! X-Inbox-Event: new_thread
//! X-Inbox-Signature: sha256=<hex>        (when a secret is configured)
//!
//! {"type":"new_thread","room_id":"!abc:example.org","thread":{...}}
//!
//! 200 {"message_id":"$evt"}
//! ```
//!
//! [`LogSink`] only logs, for running without a relay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use inbox_core::config::NotifyConfig;
use inbox_core::defaults::NOTIFY_RETRY_DELAY_SECS;
use inbox_core::{
    Error, NotificationSink, OverviewEntry, PublishedReply, PublishedThread, ReplyNotice, Result,
    ThreadNotice,
};
use inbox_jobs::cancellable_sleep;

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_HEADER: &str = "X-Inbox-Event";
pub const SIGNATURE_HEADER: &str = "X-Inbox-Signature";

/// Events posted to the relay.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEvent<'a> {
    Ready,
    RoomName {
        room_id: &'a str,
    },
    NewThread {
        room_id: &'a str,
        thread: &'a ThreadNotice,
    },
    Reply {
        reply: &'a ReplyNotice,
    },
    Overview {
        room_id: &'a str,
        previous_message_id: Option<&'a str>,
        entries: &'a [OverviewEntry],
    },
    RemoveOverview {
        room_id: &'a str,
        message_id: Option<&'a str>,
    },
}

impl WebhookEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            WebhookEvent::Ready => "ready",
            WebhookEvent::RoomName { .. } => "room_name",
            WebhookEvent::NewThread { .. } => "new_thread",
            WebhookEvent::Reply { .. } => "reply",
            WebhookEvent::Overview { .. } => "overview",
            WebhookEvent::RemoveOverview { .. } => "remove_overview",
        }
    }
}

/// Relay response. Every field is optional; which ones are required depends
/// on the event.
#[derive(Debug, Default, Deserialize)]
struct Ack {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    root_redacted: bool,
    #[serde(default)]
    name: Option<String>,
}

/// `sha256=<hex>` HMAC of `body` under `secret`.
pub fn sign(secret: &str, body: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body.as_bytes());
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Notification sink posting JSON events to a chat relay.
pub struct WebhookSink {
    client: Client,
    url: String,
    secret: Option<String>,
    ready_retry: Duration,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build webhook HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
            ready_retry: Duration::from_secs(NOTIFY_RETRY_DELAY_SECS),
        })
    }

    /// `None` when no webhook url is configured.
    pub fn from_config(config: &NotifyConfig) -> Result<Option<Self>> {
        config
            .webhook_url
            .as_ref()
            .map(|url| Self::new(url.clone(), config.webhook_secret.clone(), config.timeout()))
            .transpose()
    }

    pub fn with_ready_retry(mut self, delay: Duration) -> Self {
        self.ready_retry = delay;
        self
    }

    async fn post(&self, event: &WebhookEvent<'_>) -> Result<Ack> {
        let body = serde_json::to_string(event)?;
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(EVENT_HEADER, event.name());
        if let Some(signature) = self.secret.as_deref().and_then(|s| sign(s, &body)) {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "relay answered {} to {}: {}",
                status,
                event.name(),
                text
            )));
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Ack::default());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn require_message_id(ack: Ack, event: &str) -> Result<String> {
        ack.message_id.filter(|id| !id.is_empty()).ok_or_else(|| {
            Error::Notification(format!("relay returned no message id for {}", event))
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn wait_ready(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            match self.post(&WebhookEvent::Ready).await {
                Ok(_) => {
                    info!(subsystem = "notify", url = %self.url, "Chat relay ready");
                    return Ok(());
                }
                Err(e) => {
                    warn!(subsystem = "notify", error = %e, "Chat relay not ready");
                    if !cancellable_sleep(cancel, self.ready_retry).await {
                        return Err(Error::Cancelled("waiting for chat relay".into()));
                    }
                }
            }
        }
    }

    async fn room_name(&self, room_id: &str) -> Result<Option<String>> {
        let ack = self.post(&WebhookEvent::RoomName { room_id }).await?;
        Ok(ack.name)
    }

    #[instrument(
        skip(self, notice),
        fields(subsystem = "notify", op = "publish_thread", thread_id = notice.thread_id)
    )]
    async fn publish_new_thread(
        &self,
        notice: &ThreadNotice,
        room_id: &str,
    ) -> Result<PublishedThread> {
        let event = WebhookEvent::NewThread {
            room_id,
            thread: notice,
        };
        let ack = self.post(&event).await?;
        Ok(PublishedThread {
            room_id: room_id.to_string(),
            chat_message_id: Self::require_message_id(ack, event.name())?,
        })
    }

    #[instrument(
        skip(self, notice),
        fields(subsystem = "notify", op = "publish_reply", mail_id = notice.mail_id)
    )]
    async fn publish_reply(&self, notice: &ReplyNotice) -> Result<PublishedReply> {
        let event = WebhookEvent::Reply { reply: notice };
        let ack = self.post(&event).await?;
        let root_redacted = ack.root_redacted;
        let chat_message_id = if root_redacted {
            ack.message_id.unwrap_or_default()
        } else {
            Self::require_message_id(ack, event.name())?
        };
        Ok(PublishedReply {
            chat_message_id,
            root_redacted,
        })
    }

    async fn update_overview(
        &self,
        room_id: &str,
        previous_message_id: Option<&str>,
        entries: &[OverviewEntry],
    ) -> Result<String> {
        let event = WebhookEvent::Overview {
            room_id,
            previous_message_id,
            entries,
        };
        let ack = self.post(&event).await?;
        debug!(room_id, entries = entries.len(), "Overview delivered");
        Self::require_message_id(ack, event.name())
    }

    async fn remove_overview(&self, room_id: &str, message_id: Option<&str>) -> Result<()> {
        self.post(&WebhookEvent::RemoveOverview {
            room_id,
            message_id,
        })
        .await?;
        Ok(())
    }
}

/// Sink that logs notifications and makes up chat ids.
#[derive(Default)]
pub struct LogSink {
    counter: AtomicU64,
}

impl LogSink {
    fn next_id(&self, kind: &str) -> String {
        format!("log-{}-{}", kind, self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    async fn wait_ready(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn room_name(&self, _room_id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn publish_new_thread(
        &self,
        notice: &ThreadNotice,
        room_id: &str,
    ) -> Result<PublishedThread> {
        info!(
            subsystem = "notify",
            thread_id = notice.thread_id,
            room_id,
            subject = %notice.subject,
            from = %notice.addr_from,
            "New thread"
        );
        Ok(PublishedThread {
            room_id: room_id.to_string(),
            chat_message_id: self.next_id("thread"),
        })
    }

    async fn publish_reply(&self, notice: &ReplyNotice) -> Result<PublishedReply> {
        info!(
            subsystem = "notify",
            mail_id = notice.mail_id,
            room_id = %notice.room_id,
            messages = notice.messages.messages.len(),
            "Mail"
        );
        Ok(PublishedReply {
            chat_message_id: self.next_id("mail"),
            root_redacted: false,
        })
    }

    async fn update_overview(
        &self,
        room_id: &str,
        _previous_message_id: Option<&str>,
        entries: &[OverviewEntry],
    ) -> Result<String> {
        info!(subsystem = "notify", room_id, entries = entries.len(), "Overview");
        Ok(self.next_id("overview"))
    }

    async fn remove_overview(&self, _room_id: &str, _message_id: Option<&str>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use inbox_core::ExtractedMessages;
    use wiremock::matchers::{body_partial_json, header, header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn thread_notice() -> ThreadNotice {
        ThreadNotice {
            thread_id: 7,
            room_id: None,
            fetcher: Some("INBOX".to_string()),
            name_from: "Alice".to_string(),
            addr_from: "alice@example.org".to_string(),
            addr_to: vec!["team@example.org".to_string()],
            subject: "Hello".to_string(),
        }
    }

    fn reply_notice() -> ReplyNotice {
        ReplyNotice {
            mail_id: 3,
            room_id: "!room".to_string(),
            root_message_id: "$root".to_string(),
            name_from: "Alice".to_string(),
            subject: "Hello".to_string(),
            timestamp: Utc::now(),
            attachments: vec![],
            messages: ExtractedMessages::single("Alice", "Hi", Utc::now()),
            is_first: true,
        }
    }

    fn sink(server: &MockServer, secret: Option<&str>) -> WebhookSink {
        WebhookSink::new(
            format!("{}/events", server.uri()),
            secret.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_ready_retry(Duration::from_millis(10))
    }

    #[test]
    fn test_signature_format() {
        let sig = sign("secret", r#"{"type":"ready"}"#).unwrap();
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
        assert_ne!(sig, sign("other", r#"{"type":"ready"}"#).unwrap());
    }

    #[test]
    fn test_event_serialization() {
        let notice = thread_notice();
        let event = WebhookEvent::NewThread {
            room_id: "!room",
            thread: &notice,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_thread");
        assert_eq!(json["room_id"], "!room");
        assert_eq!(json["thread"]["thread_id"], 7);
        assert_eq!(event.name(), "new_thread");
    }

    #[tokio::test]
    async fn test_publish_new_thread_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header(EVENT_HEADER, "new_thread"))
            .and(body_partial_json(serde_json::json!({"room_id": "!room"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"message_id": "$evt"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let published = sink(&server, None)
            .publish_new_thread(&thread_notice(), "!room")
            .await
            .unwrap();
        assert_eq!(published.room_id, "!room");
        assert_eq!(published.chat_message_id, "$evt");
    }

    #[tokio::test]
    async fn test_requests_are_signed_with_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists(SIGNATURE_HEADER))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"message_id": "$m"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let reply = sink(&server, Some("s3cret"))
            .publish_reply(&reply_notice())
            .await
            .unwrap();
        assert_eq!(reply.chat_message_id, "$m");
        assert!(!reply.root_redacted);
    }

    #[tokio::test]
    async fn test_redacted_root_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"root_redacted": true})),
            )
            .mount(&server)
            .await;

        let reply = sink(&server, None).publish_reply(&reply_notice()).await.unwrap();
        assert!(reply.root_redacted);
    }

    #[tokio::test]
    async fn test_error_status_is_notification_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = sink(&server, None)
            .update_overview("!ovw", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Notification(_)));
    }

    #[tokio::test]
    async fn test_missing_message_id_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sink = sink(&server, None);
        assert!(sink.publish_new_thread(&thread_notice(), "!room").await.is_err());
        // removing needs no answer
        assert!(sink.remove_overview("!ovw", Some("$old")).await.is_ok());
    }

    #[tokio::test]
    async fn test_room_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header(EVENT_HEADER, "room_name"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "Sales"})),
            )
            .mount(&server)
            .await;

        let name = sink(&server, None).room_name("!sales").await.unwrap();
        assert_eq!(name.as_deref(), Some("Sales"));
    }

    #[tokio::test]
    async fn test_wait_ready_retries_until_relay_answers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header(EVENT_HEADER, "ready"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header(EVENT_HEADER, "ready"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        sink(&server, None).wait_ready(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_stops_when_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sink(&server, None).wait_ready(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_log_sink_ids_are_unique() {
        let sink = LogSink::default();
        let a = sink.publish_new_thread(&thread_notice(), "!room").await.unwrap();
        let b = sink.publish_new_thread(&thread_notice(), "!room").await.unwrap();
        assert_ne!(a.chat_message_id, b.chat_message_id);
    }
}
