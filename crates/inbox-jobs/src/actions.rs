//! Operator commands on published threads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use inbox_core::config::RoutingConfig;
use inbox_core::{
    Error, Mail, MailRepository, MailSender, NotificationSink, Result, RoomRepository,
    ThreadActions, ThreadRepository,
};

use crate::ingest::MailIngest;
use crate::overview::OverviewStages;
use crate::stage::{cancellable_sleep, Stage};

/// [`ThreadActions`] backed by the repositories and the running pipeline.
pub struct PipelineThreadActions {
    pub(crate) mails: Arc<dyn MailRepository>,
    pub(crate) threads: Arc<dyn ThreadRepository>,
    pub(crate) rooms: Arc<dyn RoomRepository>,
    pub(crate) sink: Arc<dyn NotificationSink>,
    pub(crate) sender: Option<Arc<dyn MailSender>>,
    pub(crate) routing: Arc<RoutingConfig>,
    pub(crate) ingest: Arc<MailIngest>,
    pub(crate) notification: Stage,
    pub(crate) overviews: OverviewStages,
    pub(crate) sort_lock: Arc<Mutex<()>>,
    pub(crate) move_settle: Duration,
}

impl PipelineThreadActions {
    /// Pause after a move before [`ThreadActions::move_thread`] returns.
    pub fn with_move_settle(mut self, settle: Duration) -> Self {
        self.move_settle = settle;
        self
    }

    async fn set_enabled(
        &self,
        room_id: &str,
        thread_message_id: &str,
        enabled: bool,
        force_close: bool,
    ) -> bool {
        match self
            .threads
            .set_thread_enabled(room_id, thread_message_id, enabled, force_close)
            .await
        {
            Ok(true) => {
                info!(room_id, thread_message_id, enabled, force_close, "Thread state changed");
                self.overviews.queue_for([room_id]);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(room_id, thread_message_id, error = %e, "Failed to change thread state");
                false
            }
        }
    }

    /// The single target room whose name or alias contains `query`,
    /// ignoring case.
    async fn find_target_room(&self, query: &str) -> Result<Option<String>> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(None);
        }
        let targets = self.routing.target_rooms();
        let stored = self.rooms.rooms(&targets).await?;
        let mut found = None;
        for room_id in &targets {
            let name = stored
                .iter()
                .find(|room| &room.id == room_id)
                .and_then(|room| room.name.as_deref())
                .unwrap_or_default()
                .to_lowercase();
            let alias = self.routing.alias_of(room_id).to_lowercase();
            if name.contains(&query) || alias.contains(&query) {
                if found.is_some() {
                    return Ok(None);
                }
                found = Some(room_id.clone());
            }
        }
        Ok(found)
    }

    async fn retarget_thread(
        &self,
        room_id: &str,
        thread_message_id: &str,
        target: &str,
    ) -> Result<bool> {
        let _guard = self.sort_lock.lock().await;
        let Some(thread) = self
            .threads
            .thread_by_chat_id(room_id, thread_message_id)
            .await?
        else {
            return Ok(false);
        };
        self.threads.clear_thread_chat_ids(thread.id).await?;
        self.threads.set_thread_chat_ids(thread.id, target, None).await?;
        info!(thread_id = thread.id, from = room_id, to = target, "Moved thread");
        Ok(true)
    }

    /// The mail a chat reply answers: the mail published as
    /// `reply_to_message_id` within the thread, or the thread head.
    async fn reply_target(
        &self,
        room_id: &str,
        thread_message_id: &str,
        reply_to_message_id: Option<&str>,
    ) -> Result<Mail> {
        let thread = self
            .threads
            .thread_by_chat_id(room_id, thread_message_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("thread {} in room {}", thread_message_id, room_id))
            })?;
        match reply_to_message_id {
            Some(chat_id) => self
                .mails
                .mail_by_chat_id(chat_id)
                .await?
                .filter(|mail| mail.thread == Some(thread.id))
                .ok_or_else(|| {
                    Error::NotFound(format!("mail {} in thread {}", chat_id, thread.id))
                }),
            None => self
                .mails
                .mail_by_id(thread.first_mail)
                .await?
                .ok_or(Error::MailNotFound(thread.first_mail)),
        }
    }

    /// Delete the current overview message of a room. Returns whether it
    /// is gone.
    async fn remove_overview(&self, room_id: &str) -> bool {
        let result = async {
            let previous = self.rooms.overview_message_id(room_id).await?;
            self.sink.remove_overview(room_id, previous.as_deref()).await?;
            self.rooms.set_overview_message_id(room_id, None).await
        }
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(room_id, error = %e, "Failed to remove overview");
                false
            }
        }
    }
}

#[async_trait]
impl ThreadActions for PipelineThreadActions {
    async fn open_thread(&self, room_id: &str, thread_message_id: &str) -> bool {
        self.set_enabled(room_id, thread_message_id, true, false).await
    }

    async fn close_thread(&self, room_id: &str, thread_message_id: &str, _force: bool) -> bool {
        self.set_enabled(room_id, thread_message_id, false, false).await
    }

    async fn force_close_thread(&self, room_id: &str, thread_message_id: &str) -> bool {
        self.set_enabled(room_id, thread_message_id, false, true).await
    }

    #[instrument(skip(self), fields(subsystem = "pipeline", op = "move_thread"))]
    async fn move_thread(&self, room_id: &str, thread_message_id: &str, query: &str) -> bool {
        let target = match self.find_target_room(query).await {
            Ok(Some(target)) if target != room_id => target,
            Ok(_) => return false,
            Err(e) => {
                warn!(error = %e, "Failed to look up rooms");
                return false;
            }
        };
        match self.retarget_thread(room_id, thread_message_id, &target).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!(error = %e, "Failed to move thread");
                return false;
            }
        }

        let republish = async {
            self.notification.queue_work_blocking().await;
            cancellable_sleep(&self.notification.cancel_token(), self.move_settle).await;
        };
        tokio::join!(self.overviews.queue_for_blocking([room_id]), republish);
        true
    }

    #[instrument(skip(self, text), fields(subsystem = "pipeline", op = "reply"))]
    async fn reply(
        &self,
        room_id: &str,
        thread_message_id: &str,
        reply_to_message_id: Option<&str>,
        text: &str,
        cite: bool,
    ) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::Config("no mail sender configured".into()))?;
        let original = self
            .reply_target(room_id, thread_message_id, reply_to_message_id)
            .await?;
        let sent = sender.send_reply(&original, text, cite).await?;
        info!(mail_id = original.id, message_id = %sent.message_id, "Sent reply");
        self.ingest.store_mails(&[sent]).await?;
        Ok(())
    }

    async fn resend_overview(&self, room_id: &str) -> bool {
        let Some(stage) = self.overviews.get(room_id) else {
            return false;
        };
        if !self.remove_overview(room_id).await {
            return false;
        }
        stage.queue_work_blocking().await
    }

    async fn resend_all_overviews(&self) -> bool {
        let mut ok = true;
        for (room_id, _) in self.overviews.iter() {
            ok &= self.remove_overview(room_id).await;
        }
        self.overviews.queue_all_blocking().await && ok
    }
}
