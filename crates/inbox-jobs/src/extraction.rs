//! Message extraction stage.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use inbox_core::{ExtractionOracle, Mail, MailRepository, Result};
use inbox_text::extract_messages;

use crate::stage::{cancellable_sleep, Stage, StageContext, StageWork};

/// Extracts the messages of every unextracted mail, then queues sorting.
pub struct ExtractionWork {
    mails: Arc<dyn MailRepository>,
    oracle: Arc<dyn ExtractionOracle>,
    extraction: Stage,
    sorting: Stage,
    retry_delay: Duration,
}

impl ExtractionWork {
    pub fn new(
        mails: Arc<dyn MailRepository>,
        oracle: Arc<dyn ExtractionOracle>,
        extraction: Stage,
        sorting: Stage,
        retry_delay: Duration,
    ) -> Self {
        Self {
            mails,
            oracle,
            extraction,
            sorting,
            retry_delay,
        }
    }
}

#[async_trait]
impl StageWork for ExtractionWork {
    async fn work(&self, ctx: &StageContext) -> bool {
        let pending = match self.mails.mails_needing_extraction().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Failed to load mails needing extraction");
                return !cancellable_sleep(&ctx.cancel, self.retry_delay).await;
            }
        };
        if pending.is_empty() {
            if ctx.first_work {
                self.sorting.queue_work();
            }
            return true;
        }

        let start = Instant::now();
        let total = pending.len();
        info!(
            subsystem = "pipeline",
            op = "extract",
            result_count = total,
            "Extracting messages"
        );

        let mut tasks = JoinSet::new();
        for batch in conversation_batches(pending) {
            let mails = self.mails.clone();
            let oracle = self.oracle.clone();
            let cancel = ctx.cancel.clone();
            tasks.spawn(async move {
                extract_batch(mails.as_ref(), oracle.as_ref(), batch, &cancel).await
            });
        }

        let mut failed_batches = 0usize;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => {}
                Ok(false) => failed_batches += 1,
                Err(e) => {
                    error!(error = ?e, "Extraction batch panicked");
                    failed_batches += 1;
                }
            }
        }

        info!(
            subsystem = "pipeline",
            op = "extract",
            result_count = total,
            failed_batches,
            duration_ms = start.elapsed().as_millis() as u64,
            "Done extracting messages"
        );

        if failed_batches > 0 && cancellable_sleep(&ctx.cancel, self.retry_delay).await {
            self.extraction.queue_work();
        }
        self.sorting.queue_work();
        true
    }
}

/// Group mails by thread, keeping the work-list order inside each group and
/// ordering groups by their first mail. All unthreaded mails form one batch.
pub fn conversation_batches(mails: Vec<Mail>) -> Vec<Vec<Mail>> {
    let mut index: HashMap<Option<i64>, usize> = HashMap::new();
    let mut batches: Vec<Vec<Mail>> = Vec::new();
    for mail in mails {
        let key = mail.conversation_key();
        match index.get(&key) {
            Some(&i) => batches[i].push(mail),
            None => {
                index.insert(key, batches.len());
                batches.push(vec![mail]);
            }
        }
    }
    batches
}

/// Extract a batch sequentially. Stops at the first failure; returns whether
/// every mail was extracted.
async fn extract_batch(
    mails: &dyn MailRepository,
    oracle: &dyn ExtractionOracle,
    batch: Vec<Mail>,
    cancel: &CancellationToken,
) -> bool {
    for mail in &batch {
        if cancel.is_cancelled() {
            return false;
        }
        if let Err(e) = extract_one(mails, oracle, mail, cancel).await {
            warn!(
                subsystem = "pipeline",
                mail_id = mail.id,
                error = %e,
                "Message extraction failed, aborting batch"
            );
            return false;
        }
    }
    true
}

async fn extract_one(
    mails: &dyn MailRepository,
    oracle: &dyn ExtractionOracle,
    mail: &Mail,
    cancel: &CancellationToken,
) -> Result<()> {
    let history = load_history(mails, mail).await?;
    debug!(mail_id = mail.id, history_len = history.len(), "Loaded mail history");
    let extracted = extract_messages(oracle, mail, &history, cancel).await?;
    mails.save_extracted_messages(mail.id, &extracted).await
}

/// Earlier mails a mail may quote: its thread plus everything it references,
/// oldest first. Only extracted mails are kept.
pub async fn load_history(mails: &dyn MailRepository, mail: &Mail) -> Result<Vec<Mail>> {
    let mut candidates = match mail.thread {
        Some(thread_id) => mails.thread_history(thread_id).await?,
        None => Vec::new(),
    };
    let mut referenced = mail.references.clone();
    if let Some(parent) = mail.in_reply_to.as_ref().filter(|id| !id.trim().is_empty()) {
        referenced.push(parent.clone());
    }
    if !referenced.is_empty() {
        candidates.extend(mails.mails_by_message_ids(&referenced).await?);
    }

    let mut seen = HashSet::new();
    let mut history: Vec<Mail> = candidates
        .into_iter()
        .filter(|m| seen.insert(m.message_id.clone()))
        .filter(|m| m.id != mail.id && m.timestamp <= mail.timestamp)
        .filter(|m| m.messages.is_some())
        .collect();
    history.sort_by_key(|m| m.timestamp);
    Ok(history)
}
