//! Thread sorting stage.
//!
//! Each extracted, unsorted mail is attached to an existing thread, becomes
//! the head of a new thread, or is marked sorted without a thread when its
//! sender is blacklisted as a thread head. Mails are processed in timestamp
//! order so a reply sorted later in the same pass finds its parent's thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use inbox_core::config::ThreadingConfig;
use inbox_core::defaults::SORT_WAIT_POLL_SECS;
use inbox_core::{Mail, MailRepository, Result, ThreadRepository};

use crate::ingest::MailboxActivity;
use crate::stage::{cancellable_sleep, Stage, StageContext, StageWork};

/// Where a mail belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAssignment {
    /// Attach to an existing thread.
    Existing(i64),
    /// Start a new thread headed by the mail.
    NewThread,
    /// Leave the mail without a thread.
    NoThread,
}

/// Decides and persists thread membership.
#[derive(Clone)]
pub struct ThreadResolver {
    mails: Arc<dyn MailRepository>,
    threads: Arc<dyn ThreadRepository>,
    threading: ThreadingConfig,
}

impl ThreadResolver {
    pub fn new(
        mails: Arc<dyn MailRepository>,
        threads: Arc<dyn ThreadRepository>,
        threading: ThreadingConfig,
    ) -> Self {
        Self {
            mails,
            threads,
            threading,
        }
    }

    /// Decide where `mail` belongs.
    ///
    /// The replied-to mail's thread wins unless that thread was force-closed;
    /// then the most recent threaded mail among the references; then a new
    /// thread, unless the sender may not head one.
    pub async fn resolve(&self, mail: &Mail) -> Result<ThreadAssignment> {
        if let Some(target_id) = mail.reply_to {
            if let Some(thread_id) = self.reply_target_thread(target_id).await? {
                return Ok(ThreadAssignment::Existing(thread_id));
            }
        }

        if !mail.references.is_empty() {
            let parents = self
                .mails
                .threaded_mails_by_reference_ids(&mail.references)
                .await?;
            if let Some(thread_id) = parents.iter().find_map(|m| m.thread) {
                return Ok(ThreadAssignment::Existing(thread_id));
            }
        }

        if self.threading.is_blacklisted(&mail.addr_from) {
            return Ok(ThreadAssignment::NoThread);
        }
        Ok(ThreadAssignment::NewThread)
    }

    async fn reply_target_thread(&self, target_id: i64) -> Result<Option<i64>> {
        let Some(thread_id) = self
            .mails
            .mail_by_id(target_id)
            .await?
            .and_then(|target| target.thread)
        else {
            return Ok(None);
        };
        match self.threads.thread_by_id(thread_id).await? {
            Some(thread) if !thread.force_close => Ok(Some(thread_id)),
            Some(_) => {
                debug!(thread_id, "Reply target thread is force-closed");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Resolve and persist one mail.
    #[instrument(
        skip(self, mail),
        fields(subsystem = "pipeline", component = "resolver", mail_id = mail.id)
    )]
    pub async fn sort_mail(&self, mail: &Mail) -> Result<ThreadAssignment> {
        let assignment = self.resolve(mail).await?;
        match assignment {
            ThreadAssignment::Existing(thread_id) => {
                // the mail stays unsorted until the thread records it
                self.threads
                    .update_last_mail(thread_id, mail.id, mail.timestamp)
                    .await?;
                self.mails.assign_thread(mail.id, thread_id).await?;
                debug!(thread_id, "Attached mail to thread");
            }
            ThreadAssignment::NewThread => {
                let thread_id = self.threads.create_thread(mail).await?;
                debug!(thread_id, "Created thread");
            }
            ThreadAssignment::NoThread => {
                self.mails.mark_sorted_without_thread(mail.id).await?;
                info!(addr_from = %mail.addr_from, "Ignoring mail as thread head");
            }
        }
        Ok(assignment)
    }
}

/// Sorting stage work: waits for a quiet mailbox, then sorts every pending mail.
pub struct SortingWork {
    resolver: ThreadResolver,
    activity: MailboxActivity,
    extraction: Stage,
    sorting: Stage,
    notification: Stage,
    sort_lock: Arc<Mutex<()>>,
}

impl SortingWork {
    pub fn new(
        resolver: ThreadResolver,
        activity: MailboxActivity,
        extraction: Stage,
        sorting: Stage,
        notification: Stage,
        sort_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            resolver,
            activity,
            extraction,
            sorting,
            notification,
            sort_lock,
        }
    }

    /// More mail may still be arriving.
    fn should_wait(&self) -> bool {
        let threading = &self.resolver.threading;
        self.extraction.is_working()
            || (self.activity.since_last_update() < threading.quiet_window()
                && self.sorting.time_since_queued() < threading.sort_timeout())
    }

    async fn pause(&self, ctx: &StageContext) -> bool {
        cancellable_sleep(&ctx.cancel, Duration::from_secs(SORT_WAIT_POLL_SECS)).await;
        false
    }
}

#[async_trait]
impl StageWork for SortingWork {
    async fn work(&self, ctx: &StageContext) -> bool {
        if self.should_wait() {
            debug!(
                extraction_working = self.extraction.is_working(),
                "Waiting for complete data to sort threads"
            );
            return self.pause(ctx).await;
        }

        let _guard = self.sort_lock.lock().await;
        let mails = &self.resolver.mails;

        match mails.link_reply_targets().await {
            Ok(linked) if linked > 0 => debug!(linked, "Linked reply targets"),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Failed to link reply targets");
                return self.pause(ctx).await;
            }
        }

        let pending = match mails.mails_needing_sorting().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Failed to load mails needing sorting");
                return self.pause(ctx).await;
            }
        };
        if pending.is_empty() {
            return true;
        }

        let start = Instant::now();
        info!(
            subsystem = "pipeline",
            op = "sort",
            result_count = pending.len(),
            "Sorting mails"
        );
        let mut sorted = 0usize;
        for mail in &pending {
            match self.resolver.sort_mail(mail).await {
                Ok(_) => sorted += 1,
                Err(e) => warn!(mail_id = mail.id, error = %e, "Failed to sort mail"),
            }
        }
        info!(
            subsystem = "pipeline",
            op = "sort",
            result_count = sorted,
            duration_ms = start.elapsed().as_millis() as u64,
            "Done sorting mails"
        );

        self.notification.queue_work();
        true
    }
}
