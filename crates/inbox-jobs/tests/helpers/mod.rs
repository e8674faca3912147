//! Test helpers for pipeline tests.
//!
//! Provides a scripted oracle, a recording chat sink, a mail sender and
//! polling assertions over the in-memory store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use inbox_db::MemoryStore;
use inbox_jobs::{
    AppConfig, Error, ExtractedMessages, ExtractionOracle, Mail, MailSender, Message, NewMail,
    NotificationSink, OracleRequest, OverviewEntry, Pipeline, PipelineDeps, PublishedReply,
    PublishedThread, ReplyNotice, Result, ThreadNotice,
};

pub const PLACEHOLDER: &str = "\n\n=== PLACEHOLDER ===\n\n";

/// Routing used by most tests: `!inbox` by default, `!sales` for mail to
/// `sales@`, and an overview room `!ovw` listing every room.
pub const ROUTING_TOML: &str = r#"
[routing]
default_room = "inbox"
aliases = { inbox = "!inbox", sales = "!sales", ovw = "!ovw" }
rooms_addr_to = { "^sales@" = "sales" }
overview = { ovw = [] }

[threading]
head_blacklist = ["^noreply@"]
quiet_window_secs = 0

[extraction]
retry_delay_secs = 0
"#;

pub fn test_config() -> AppConfig {
    AppConfig::parse_toml(ROUTING_TOML).unwrap()
}

// ============================================================================
// ORACLE
// ============================================================================

/// Splits the conversation at placeholders; every masked block comes back
/// as a placeholder message. Fails the first `failures` calls and answers
/// after `delay`.
#[derive(Default)]
pub struct ScriptedOracle {
    pub requests: Mutex<Vec<OracleRequest>>,
    failures: AtomicU32,
    delay: Duration,
}

impl ScriptedOracle {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// The first request whose conversation contains `text`.
    pub fn request_containing(&self, text: &str) -> Option<OracleRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.conversation.contains(text))
            .cloned()
    }
}

#[async_trait]
impl ExtractionOracle for ScriptedOracle {
    fn placeholder(&self) -> &str {
        PLACEHOLDER
    }

    async fn extract(
        &self,
        request: &OracleRequest,
        _cancel: &CancellationToken,
    ) -> Result<ExtractedMessages> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Oracle("scripted failure".to_string()));
        }

        let mut messages = Vec::new();
        for (i, part) in request.conversation.split(PLACEHOLDER).enumerate() {
            if i > 0 {
                messages.push(Message {
                    author: String::new(),
                    timestamp: None,
                    content: PLACEHOLDER.to_string(),
                });
            }
            if !part.trim().is_empty() {
                messages.push(Message {
                    author: request.author.clone(),
                    timestamp: None,
                    content: part.trim().to_string(),
                });
            }
        }
        Ok(ExtractedMessages {
            messages,
            forwarded: false,
            forwarded_by: None,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// SINK
// ============================================================================

#[derive(Debug, Default)]
pub struct SinkLog {
    /// (thread id, room, chat message id)
    pub threads: Vec<(i64, String, String)>,
    /// (mail id, room, root chat message id)
    pub replies: Vec<(i64, String, String)>,
    /// (room, number of entries)
    pub overviews: Vec<(String, usize)>,
    pub removed_overviews: Vec<String>,
}

/// Records everything published; fails the first `failures` publishes.
#[derive(Default)]
pub struct RecordingSink {
    pub log: Mutex<SinkLog>,
    pub room_names: HashMap<String, String>,
    counter: AtomicU32,
    failures: AtomicU32,
}

impl RecordingSink {
    pub fn with_room_names(names: &[(&str, &str)]) -> Self {
        Self {
            room_names: names
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("${}{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn maybe_fail(&self) -> Result<()> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Notification("scripted failure".to_string()));
        }
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.log.lock().unwrap().threads.len()
    }

    pub fn reply_count(&self) -> usize {
        self.log.lock().unwrap().replies.len()
    }

    pub fn last_overview(&self, room: &str) -> Option<usize> {
        self.log
            .lock()
            .unwrap()
            .overviews
            .iter()
            .rev()
            .find(|(r, _)| r == room)
            .map(|(_, n)| *n)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn wait_ready(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn room_name(&self, room_id: &str) -> Result<Option<String>> {
        Ok(self.room_names.get(room_id).cloned())
    }

    async fn publish_new_thread(
        &self,
        notice: &ThreadNotice,
        room_id: &str,
    ) -> Result<PublishedThread> {
        self.maybe_fail()?;
        let chat_message_id = self.next_id("thread");
        self.log.lock().unwrap().threads.push((
            notice.thread_id,
            room_id.to_string(),
            chat_message_id.clone(),
        ));
        Ok(PublishedThread {
            room_id: room_id.to_string(),
            chat_message_id,
        })
    }

    async fn publish_reply(&self, notice: &ReplyNotice) -> Result<PublishedReply> {
        self.maybe_fail()?;
        self.log.lock().unwrap().replies.push((
            notice.mail_id,
            notice.room_id.clone(),
            notice.root_message_id.clone(),
        ));
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
        self.log
            .lock()
            .unwrap()
            .overviews
            .push((room_id.to_string(), entries.len()));
        Ok(self.next_id("overview"))
    }

    async fn remove_overview(&self, room_id: &str, _message_id: Option<&str>) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .removed_overviews
            .push(room_id.to_string());
        Ok(())
    }
}

// ============================================================================
// SENDER
// ============================================================================

/// Pretends to send replies and returns them as they would be fetched.
#[derive(Default)]
pub struct EchoSender {
    counter: AtomicU32,
}

#[async_trait]
impl MailSender for EchoSender {
    async fn send_reply(&self, original: &Mail, text: &str, cite: bool) -> Result<NewMail> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut references = original.references.clone();
        references.push(original.message_id.clone());
        let body = if cite {
            format!("{}\n\n> {}", text, original.body)
        } else {
            text.to_string()
        };
        Ok(NewMail {
            fetcher: original.fetcher.clone(),
            message_id: format!("<reply-{}@bridge>", n),
            in_reply_to: Some(original.message_id.clone()),
            references,
            subject: format!("Re: {}", original.subject),
            name_from: "Bridge".to_string(),
            addr_from: "bridge@example.org".to_string(),
            addr_to: vec![original.addr_from.clone()],
            timestamp: Utc::now(),
            body,
            attachments: Vec::new(),
        })
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub oracle: Arc<ScriptedOracle>,
    pub sink: Arc<RecordingSink>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn start(oracle: ScriptedOracle, sink: RecordingSink) -> Self {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(oracle);
        let sink = Arc::new(sink);
        let deps = PipelineDeps::from_store(store.clone(), oracle.clone(), sink.clone());
        let pipeline = Pipeline::new(test_config(), deps);
        pipeline.start();
        Self {
            store,
            oracle,
            sink,
            pipeline,
        }
    }

    pub async fn mail(&self, message_id: &str) -> Mail {
        self.store.mail_by_message_id(message_id).await.unwrap()
    }

    /// Wait until every stored mail is sorted and, if threaded, published.
    pub async fn settled(&self) {
        let store = self.store.clone();
        wait_for("all mails sorted and published", || {
            let store = store.clone();
            async move {
                let mails = store.all_mails().await;
                !mails.is_empty()
                    && mails
                        .iter()
                        .all(|m| m.sorted && (m.thread.is_none() || m.chat_message_id.is_some()))
            }
        })
        .await;
    }
}

/// Poll `condition` until it holds; panics after thirty seconds.
///
/// Tests run with paused time, so the deadline is virtual.
pub async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for: {}", what);
}
