//! Storing fetched mails and tracking mailbox activity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use inbox_core::{MailRepository, NewMail, Result};

use crate::stage::Stage;

/// Time of the last mailbox update, shared by ingestion and sorting.
#[derive(Debug, Clone, Default)]
pub struct MailboxActivity {
    last_update: Arc<Mutex<Option<Instant>>>,
}

impl MailboxActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mailbox update now.
    pub fn touch(&self) {
        let mut last = self
            .last_update
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Instant::now());
    }

    /// Time since the last update; `Duration::MAX` before the first one.
    pub fn since_last_update(&self) -> Duration {
        self.last_update
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX)
    }
}

/// Stores fetched mail batches and queues extraction for new mail.
pub struct MailIngest {
    mails: Arc<dyn MailRepository>,
    activity: MailboxActivity,
    extraction: Stage,
    initial: AtomicBool,
}

impl MailIngest {
    pub fn new(
        mails: Arc<dyn MailRepository>,
        activity: MailboxActivity,
        extraction: Stage,
    ) -> Self {
        Self {
            mails,
            activity,
            extraction,
            initial: AtomicBool::new(true),
        }
    }

    /// Store a fetched batch. Extraction is queued when anything new was
    /// stored, and always for the first batch.
    ///
    /// Returns the number of newly stored mails.
    pub async fn store_mails(&self, batch: &[NewMail]) -> Result<u64> {
        self.activity.touch();
        let inserted = self.mails.insert_mails(batch).await?;
        let initial = self.initial.swap(false, Ordering::AcqRel);
        if inserted > 0 || initial {
            info!(
                subsystem = "pipeline",
                op = "store_mails",
                result_count = inserted,
                fetched = batch.len(),
                "Added new mails"
            );
            self.extraction.queue_work();
        } else {
            debug!(fetched = batch.len(), "No new mails in batch");
        }
        Ok(inserted)
    }
}
