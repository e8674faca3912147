//! Core traits for inbox-collab abstractions.
//!
//! These traits define the interfaces the pipeline depends on, so storage,
//! the extraction oracle and the chat layer can be swapped out (PostgreSQL or
//! in-memory storage, HTTP or passthrough oracle, webhook or test sinks).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// MAIL REPOSITORY
// =============================================================================

/// Repository for mail rows.
#[async_trait]
pub trait MailRepository: Send + Sync {
    /// Insert fetched mails, skipping message-ids that are already stored.
    ///
    /// Returns the number of newly stored mails.
    async fn insert_mails(&self, mails: &[NewMail]) -> Result<u64>;

    /// Mails without an extraction result, oldest first.
    async fn mails_needing_extraction(&self) -> Result<Vec<Mail>>;

    /// Extracted mails that have not been sorted yet, oldest first.
    async fn mails_needing_sorting(&self) -> Result<Vec<Mail>>;

    /// All mails of a thread, oldest first.
    async fn thread_history(&self, thread_id: i64) -> Result<Vec<Mail>>;

    /// Mails whose message-id is one of `message_ids`.
    async fn mails_by_message_ids(&self, message_ids: &[String]) -> Result<Vec<Mail>>;

    /// Get a mail by row id.
    async fn mail_by_id(&self, id: i64) -> Result<Option<Mail>>;

    /// Get a mail by the chat message it was published as.
    async fn mail_by_chat_id(&self, chat_message_id: &str) -> Result<Option<Mail>>;

    /// Threaded mails whose message-id is one of `message_ids`, most recent first.
    async fn threaded_mails_by_reference_ids(&self, message_ids: &[String]) -> Result<Vec<Mail>>;

    /// Resolve `reply_to` for unthreaded mails whose `In-Reply-To` matches a
    /// stored message-id. Returns the number of linked mails.
    async fn link_reply_targets(&self) -> Result<u64>;

    /// Replace the extraction result of a mail.
    async fn save_extracted_messages(&self, mail_id: i64, messages: &ExtractedMessages)
        -> Result<()>;

    /// Assign a mail to a thread and mark it sorted.
    ///
    /// A mail that already has a thread keeps it.
    async fn assign_thread(&self, mail_id: i64, thread_id: i64) -> Result<()>;

    /// Mark a mail sorted without a thread.
    async fn mark_sorted_without_thread(&self, mail_id: i64) -> Result<()>;

    /// Threaded, extracted, unpublished mails whose thread has a chat message,
    /// oldest first.
    async fn mails_ready_for_notification(&self) -> Result<Vec<ReplyNotice>>;

    /// Record the chat message a mail was published as.
    async fn set_mail_chat_id(&self, mail_id: i64, chat_message_id: &str) -> Result<()>;
}

// =============================================================================
// THREAD REPOSITORY
// =============================================================================

/// Repository for thread rows.
#[async_trait]
pub trait ThreadRepository: Send + Sync {
    /// Create an open thread headed by `head` and assign `head` to it.
    async fn create_thread(&self, head: &Mail) -> Result<i64>;

    /// Get a thread by row id.
    async fn thread_by_id(&self, id: i64) -> Result<Option<Thread>>;

    /// Get a thread by its chat room and root chat message.
    async fn thread_by_chat_id(&self, room_id: &str, chat_message_id: &str)
        -> Result<Option<Thread>>;

    /// Record new activity: advance `last_mail`/`last_activity` if `timestamp`
    /// is not older than the current activity, and reopen the thread.
    async fn update_last_mail(
        &self,
        thread_id: i64,
        mail_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Threads without a root chat message, by head timestamp.
    async fn threads_ready_for_notification(&self) -> Result<Vec<ThreadNotice>>;

    /// Record the room and root chat message of a thread.
    ///
    /// `chat_message_id = None` re-targets the thread to `room_id` so it is
    /// published there on the next notification pass.
    async fn set_thread_chat_ids(
        &self,
        thread_id: i64,
        room_id: &str,
        chat_message_id: Option<&str>,
    ) -> Result<()>;

    /// Forget the chat messages of a thread and all its mails, keeping the room.
    ///
    /// Returns whether the thread existed.
    async fn clear_thread_chat_ids(&self, thread_id: i64) -> Result<bool>;

    /// Open or close the thread identified by its chat ids.
    ///
    /// Opening clears `force_close`; closing sets it only when `force_close`
    /// is requested and otherwise leaves it as it was. Returns whether exactly
    /// one thread matched.
    async fn set_thread_enabled(
        &self,
        room_id: &str,
        chat_message_id: &str,
        enabled: bool,
        force_close: bool,
    ) -> Result<bool>;

    /// Open, published threads in any of `rooms`, most recent activity first.
    async fn overview_threads(&self, rooms: &[String]) -> Result<Vec<OverviewEntry>>;
}

// =============================================================================
// ROOM REPOSITORY
// =============================================================================

/// Repository for configured chat rooms.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Insert every room id that is not stored yet.
    async fn ensure_rooms(&self, room_ids: &[String]) -> Result<()>;

    /// Stored rooms among `room_ids`.
    async fn rooms(&self, room_ids: &[String]) -> Result<Vec<Room>>;

    /// Update the display name of a room.
    async fn set_room_name(&self, room_id: &str, name: &str) -> Result<()>;

    /// Chat message currently holding the overview of a room.
    async fn overview_message_id(&self, room_id: &str) -> Result<Option<String>>;

    /// Record the chat message holding the overview of a room.
    async fn set_overview_message_id(&self, room_id: &str, message_id: Option<&str>)
        -> Result<()>;
}

// =============================================================================
// EXTRACTION ORACLE
// =============================================================================

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"==\s*PLACEHOLDER\s*==").unwrap());

/// Request sent to the extraction oracle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRequest {
    pub author: String,
    /// Mail body with previously seen blocks masked.
    pub conversation: String,
    pub subject: String,
    /// `%Y-%m-%dT%H:%M` formatted mail timestamp.
    pub timestamp: String,
    pub reply_candidate: bool,
    pub forward_candidate: bool,
}

/// External service that splits a mail body into individual messages.
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Sentinel substituted for masked blocks before extraction.
    fn placeholder(&self) -> &str;

    /// Whether an extracted message is (an echo of) the placeholder.
    fn is_placeholder(&self, content: &str) -> bool {
        PLACEHOLDER_PATTERN.is_match(content)
    }

    /// Extract the messages of one mail.
    ///
    /// Must return promptly with [`crate::Error::Cancelled`] once `cancel` fires.
    async fn extract(
        &self,
        request: &OracleRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractedMessages>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// =============================================================================
// NOTIFICATION SINK
// =============================================================================

/// Result of publishing a new thread.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedThread {
    pub room_id: String,
    pub chat_message_id: String,
}

/// Result of publishing a mail into a thread.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedReply {
    pub chat_message_id: String,
    /// The thread's root message no longer exists in the chat.
    pub root_redacted: bool,
}

/// The chat layer the pipeline publishes to.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Wait until the chat layer can accept messages.
    async fn wait_ready(&self, cancel: &CancellationToken) -> Result<()>;

    /// Display name of a room, if the chat layer knows it.
    async fn room_name(&self, room_id: &str) -> Result<Option<String>>;

    /// Publish the root message of a new thread into `room_id`.
    async fn publish_new_thread(&self, notice: &ThreadNotice, room_id: &str)
        -> Result<PublishedThread>;

    /// Publish a mail into its thread.
    async fn publish_reply(&self, notice: &ReplyNotice) -> Result<PublishedReply>;

    /// Replace the overview message of `room_id`. Returns the new message id.
    async fn update_overview(
        &self,
        room_id: &str,
        previous_message_id: Option<&str>,
        entries: &[OverviewEntry],
    ) -> Result<String>;

    /// Remove the overview message of `room_id`.
    async fn remove_overview(&self, room_id: &str, message_id: Option<&str>) -> Result<()>;
}

// =============================================================================
// MAIL SENDER
// =============================================================================

/// Outgoing mail transport.
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Send `text` as a reply to `original`, quoting it when `cite` is set.
    ///
    /// Returns the sent mail so it can be stored like a fetched one.
    async fn send_reply(&self, original: &Mail, text: &str, cite: bool) -> Result<NewMail>;
}

// =============================================================================
// THREAD ACTIONS
// =============================================================================

/// Operator commands issued from the chat layer.
///
/// Threads are identified by their chat room and root chat message.
#[async_trait]
pub trait ThreadActions: Send + Sync {
    async fn open_thread(&self, room_id: &str, thread_message_id: &str) -> bool;

    /// Close a thread. `force` is ignored; use [`ThreadActions::force_close_thread`].
    async fn close_thread(&self, room_id: &str, thread_message_id: &str, force: bool) -> bool;

    /// Close a thread so replies can no longer reopen it.
    async fn force_close_thread(&self, room_id: &str, thread_message_id: &str) -> bool;

    /// Move a thread to the single target room matching `query`.
    async fn move_thread(&self, room_id: &str, thread_message_id: &str, query: &str) -> bool;

    /// Reply by mail to the mail published as `reply_to_message_id`, or to the
    /// thread head when it is `None`.
    async fn reply(
        &self,
        room_id: &str,
        thread_message_id: &str,
        reply_to_message_id: Option<&str>,
        text: &str,
        cite: bool,
    ) -> Result<()>;

    async fn resend_overview(&self, room_id: &str) -> bool;

    async fn resend_all_overviews(&self) -> bool;
}
