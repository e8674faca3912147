//! Core data models for inbox-collab.
//!
//! These types are shared across all inbox-collab crates and represent
//! the mail, thread and extraction entities the pipeline moves around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// MAIL TYPES
// =============================================================================

/// One ingested email.
///
/// Created unsorted and unextracted; extraction fills `messages`, sorting
/// fills `thread` (at most once) and `reply_to`, notification fills
/// `chat_message_id`. Mails are never deleted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    pub id: i64,
    /// `Message-ID` header, unique across the store.
    pub message_id: String,
    /// `In-Reply-To` header value.
    pub in_reply_to: Option<String>,
    /// `References` header ids in header order.
    #[serde(default)]
    pub references: Vec<String>,
    pub subject: String,
    pub name_from: String,
    pub addr_from: String,
    #[serde(default)]
    pub addr_to: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    /// Source mailbox the mail was fetched from.
    pub fetcher: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Extraction result, `None` until extraction succeeds.
    pub messages: Option<ExtractedMessages>,
    /// Mail this one replies to, resolved from `in_reply_to`.
    pub reply_to: Option<i64>,
    /// Owning thread, set once by thread sorting.
    pub thread: Option<i64>,
    /// Whether sorting has handled the mail (with or without a thread).
    pub sorted: bool,
    /// Chat message id once published.
    pub chat_message_id: Option<String>,
}

impl Mail {
    /// The mail answers another mail (has an `In-Reply-To` header).
    pub fn is_reply_candidate(&self) -> bool {
        self.in_reply_to
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// The mail carries `References` but no `In-Reply-To`, which is how
    /// most clients send forwarded conversations.
    pub fn is_forward_candidate(&self) -> bool {
        !self.references.is_empty() && !self.is_reply_candidate()
    }

    /// Display name of the sender, falling back to the local part of the address.
    pub fn display_name(&self) -> String {
        display_name(&self.name_from, &self.addr_from)
    }

    /// Key grouping mails that must be extracted sequentially.
    ///
    /// Mails of one thread share the thread id. Every mail without a thread
    /// shares `None`: a reply chain is only known once it has been sorted.
    pub fn conversation_key(&self) -> Option<i64> {
        self.thread
    }

    /// Leading message of the extraction result, if any.
    pub fn leading_message(&self) -> Option<&Message> {
        self.messages.as_ref().and_then(|m| m.messages.first())
    }
}

/// A freshly fetched mail before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMail {
    pub fetcher: Option<String>,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    pub subject: String,
    pub name_from: String,
    pub addr_from: String,
    #[serde(default)]
    pub addr_to: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Display name for a sender: the given name, or the local part of the address.
pub fn display_name(name: &str, addr: &str) -> String {
    if name.trim().is_empty() {
        match addr.split_once('@') {
            Some((local, _)) if !local.is_empty() => local.to_string(),
            _ => addr.to_string(),
        }
    } else {
        name.to_string()
    }
}

// =============================================================================
// EXTRACTION TYPES
// =============================================================================

/// One message recovered from a mail body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content: String,
}

/// Result of extracting one mail.
///
/// The first entry is the new content of the mail; the remaining entries
/// are quoted or forwarded messages the oracle could not drop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMessages {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub forwarded: bool,
    #[serde(default)]
    pub forwarded_by: Option<String>,
}

impl ExtractedMessages {
    /// Single-message result holding the mail as-is.
    pub fn single(
        author: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            messages: vec![Message {
                author: author.into(),
                timestamp: Some(timestamp),
                content: content.into(),
            }],
            forwarded: false,
            forwarded_by: None,
        }
    }
}

// =============================================================================
// THREAD TYPES
// =============================================================================

/// A causal grouping of mails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    /// Open (`true`) or closed.
    pub enabled: bool,
    /// Closed in a way that blocks re-attachment through the reply-to link.
    pub force_close: bool,
    /// Head mail; never changes after creation.
    pub first_mail: i64,
    pub last_mail: i64,
    pub last_activity: DateTime<Utc>,
    pub chat_room_id: Option<String>,
    pub chat_message_id: Option<String>,
}

// =============================================================================
// NOTIFICATION TYPES
// =============================================================================

/// A thread whose head mail is ready to be published as a new chat thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadNotice {
    pub thread_id: i64,
    /// Room already chosen for the thread (e.g. after a move).
    pub room_id: Option<String>,
    pub fetcher: Option<String>,
    pub name_from: String,
    pub addr_from: String,
    pub addr_to: Vec<String>,
    pub subject: String,
}

/// A mail ready to be published into its thread's chat thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyNotice {
    pub mail_id: i64,
    pub room_id: String,
    pub root_message_id: String,
    pub name_from: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<String>,
    pub messages: ExtractedMessages,
    /// The mail is the thread's head.
    pub is_first: bool,
}

/// One open thread listed in an overview room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverviewEntry {
    pub thread_id: i64,
    pub author: String,
    pub subject: String,
    pub room_id: String,
    pub chat_message_id: String,
    pub last_activity: DateTime<Utc>,
}

/// A configured chat room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: Option<String>,
    pub overview_message_id: Option<String>,
}
