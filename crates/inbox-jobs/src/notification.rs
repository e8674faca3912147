//! Notification stage: publishes new threads and their mails to the chat layer.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use inbox_core::config::RoutingConfig;
use inbox_core::defaults::{NOTIFY_RETRY_DELAY_SECS, ROOM_NAME_REFRESH_SECS};
use inbox_core::{
    MailRepository, NotificationSink, ReplyNotice, Result, RoomRepository, ThreadNotice,
    ThreadRepository,
};

use crate::overview::OverviewStages;
use crate::stage::{cancellable_sleep, StageContext, StageWork};

/// Outcome of one publishing pass.
enum Pass {
    Done,
    /// A thread root vanished from the chat; publish again right away.
    Republish,
}

pub struct NotificationWork {
    mails: Arc<dyn MailRepository>,
    threads: Arc<dyn ThreadRepository>,
    rooms: Arc<dyn RoomRepository>,
    sink: Arc<dyn NotificationSink>,
    routing: Arc<RoutingConfig>,
    overviews: OverviewStages,
    touched: Mutex<BTreeSet<String>>,
}

impl NotificationWork {
    pub fn new(
        mails: Arc<dyn MailRepository>,
        threads: Arc<dyn ThreadRepository>,
        rooms: Arc<dyn RoomRepository>,
        sink: Arc<dyn NotificationSink>,
        routing: Arc<RoutingConfig>,
        overviews: OverviewStages,
    ) -> Self {
        Self {
            mails,
            threads,
            rooms,
            sink,
            routing,
            overviews,
            touched: Mutex::new(BTreeSet::new()),
        }
    }

    /// Room a new thread is published into.
    fn room_for(&self, notice: &ThreadNotice) -> String {
        notice.room_id.clone().unwrap_or_else(|| {
            self.routing
                .route(notice.fetcher.as_deref(), &notice.addr_from, &notice.addr_to)
        })
    }

    async fn publish(&self, touched: &mut BTreeSet<String>) -> Result<Pass> {
        for notice in self.threads.threads_ready_for_notification().await? {
            let room = self.room_for(&notice);
            let published = self.sink.publish_new_thread(&notice, &room).await?;
            self.threads
                .set_thread_chat_ids(
                    notice.thread_id,
                    &published.room_id,
                    Some(&published.chat_message_id),
                )
                .await?;
            debug!(
                thread_id = notice.thread_id,
                room_id = %published.room_id,
                "Published thread"
            );
            touched.insert(published.room_id);
        }

        for notice in self.mails.mails_ready_for_notification().await? {
            let published = self.sink.publish_reply(&notice).await?;
            if published.root_redacted && self.forget_thread_root(&notice).await? {
                touched.insert(notice.room_id);
                return Ok(Pass::Republish);
            }
            self.mails
                .set_mail_chat_id(notice.mail_id, &published.chat_message_id)
                .await?;
            debug!(mail_id = notice.mail_id, room_id = %notice.room_id, "Published mail");
            touched.insert(notice.room_id);
        }
        Ok(Pass::Done)
    }

    /// Clear the chat ids of the thread whose root was redacted. Returns
    /// whether the thread will be published again.
    async fn forget_thread_root(&self, notice: &ReplyNotice) -> Result<bool> {
        let Some(thread) = self
            .threads
            .thread_by_chat_id(&notice.room_id, &notice.root_message_id)
            .await?
        else {
            return Ok(false);
        };
        let cleared = self.threads.clear_thread_chat_ids(thread.id).await?;
        if cleared {
            info!(
                mail_id = notice.mail_id,
                thread_id = thread.id,
                "Thread head has been redacted, republishing thread"
            );
        }
        Ok(cleared)
    }

    async fn refresh_room_names(&self) {
        refresh_room_names(self.sink.as_ref(), self.rooms.as_ref(), &self.routing.all_rooms())
            .await;
    }
}

async fn refresh_room_names(
    sink: &dyn NotificationSink,
    rooms: &dyn RoomRepository,
    room_ids: &[String],
) {
    for room_id in room_ids {
        match sink.room_name(room_id).await {
            Ok(Some(name)) => {
                if let Err(e) = rooms.set_room_name(room_id, &name).await {
                    warn!(room_id = %room_id, error = %e, "Failed to store room name");
                }
            }
            Ok(None) => {}
            Err(e) => debug!(room_id = %room_id, error = %e, "Room name unavailable"),
        }
    }
}

fn spawn_room_name_refresh(
    sink: Arc<dyn NotificationSink>,
    rooms: Arc<dyn RoomRepository>,
    room_ids: Vec<String>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(ROOM_NAME_REFRESH_SECS);
        while cancellable_sleep(&cancel, interval).await {
            refresh_room_names(sink.as_ref(), rooms.as_ref(), &room_ids).await;
        }
    });
}

#[async_trait]
impl StageWork for NotificationWork {
    async fn setup(&self, ctx: &StageContext) {
        let all_rooms = self.routing.all_rooms();
        if let Err(e) = self.rooms.ensure_rooms(&all_rooms).await {
            warn!(error = %e, "Failed to register configured rooms");
        }
        if let Err(e) = self.sink.wait_ready(&ctx.cancel).await {
            warn!(error = %e, "Chat layer did not become ready");
            return;
        }
        self.refresh_room_names().await;
        spawn_room_name_refresh(
            self.sink.clone(),
            self.rooms.clone(),
            all_rooms,
            ctx.cancel.clone(),
        );
    }

    async fn work(&self, ctx: &StageContext) -> bool {
        let mut touched = self.touched.lock().await;
        if !ctx.retry {
            touched.clear();
        }

        match self.publish(&mut touched).await {
            Ok(Pass::Done) => {
                if !touched.is_empty() {
                    self.overviews.queue_for(touched.iter().map(String::as_str));
                }
                true
            }
            Ok(Pass::Republish) => false,
            Err(e) => {
                warn!(error = %e, "Publishing to chat failed, retrying");
                let delay = Duration::from_secs(NOTIFY_RETRY_DELAY_SECS);
                cancellable_sleep(&ctx.cancel, delay).await;
                false
            }
        }
    }
}
