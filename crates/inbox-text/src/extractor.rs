//! Message extraction with quoted-history masking.
//!
//! A reply usually quotes every earlier mail of its conversation. Before the
//! body goes to the extraction oracle, every earlier mail whose extracted
//! content can be found in the body is replaced by the oracle's placeholder,
//! so the oracle only has to deal with the new text. The oracle's answer is
//! then reconciled against the same history: echoed placeholders are dropped
//! (or restored for forwards) and repeated old messages are kept out of the
//! leading position.

use inbox_core::defaults::{
    KNOWN_MESSAGE_SIMILARITY, MASK_SIMILARITY, NEAR_DUPLICATE_SIMILARITY, ORACLE_TIMESTAMP_FORMAT,
};
use inbox_core::{Error, ExtractedMessages, ExtractionOracle, Mail, OracleRequest, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::align::align;
use crate::chunk::ChunkedText;
use crate::normalize::normalize;
use crate::similarity::similarity;

struct HistoryEntry {
    mail_id: i64,
    body: ChunkedText,
    /// Leading extracted message of the history mail.
    leading: ChunkedText,
    /// The history mail is a near-duplicate of the mail being extracted.
    too_similar: bool,
}

/// Extracts the messages of one mail against its conversation history.
pub struct MessageExtractor<'a> {
    oracle: &'a dyn ExtractionOracle,
    mail: &'a Mail,
    body: ChunkedText,
    history: Vec<HistoryEntry>,
    /// History indices in the order they were masked.
    removed: Vec<usize>,
}

impl<'a> MessageExtractor<'a> {
    /// `history` holds earlier mails of the conversation, oldest first.
    /// Mails without an extraction result are ignored.
    pub fn new(oracle: &'a dyn ExtractionOracle, mail: &'a Mail, history: &[Mail]) -> Self {
        let history = history
            .iter()
            .filter(|old| old.message_id != mail.message_id)
            .filter_map(|old| {
                old.leading_message().map(|leading| HistoryEntry {
                    mail_id: old.id,
                    body: ChunkedText::new(old.body.as_str()),
                    leading: ChunkedText::new(leading.content.as_str()),
                    too_similar: false,
                })
            })
            .collect();

        Self {
            oracle,
            mail,
            body: ChunkedText::new(mail.body.as_str()),
            history,
            removed: Vec::new(),
        }
    }

    /// Run the full extraction: mask, ask the oracle, reconcile.
    pub async fn extract(mut self, cancel: &CancellationToken) -> Result<ExtractedMessages> {
        if normalize(&self.mail.body, false).is_empty() {
            debug!(mail_id = self.mail.id, "Mail body is empty, skipping oracle");
            return Ok(ExtractedMessages::single(
                self.mail.name_from.clone(),
                "",
                self.mail.timestamp,
            ));
        }

        self.mask_history();
        let request = self.request();
        let result = self.oracle.extract(&request, cancel).await?;
        if result.messages.is_empty() {
            warn!(
                mail_id = self.mail.id,
                oracle = self.oracle.name(),
                "Oracle returned no messages"
            );
            return Err(Error::Oracle("response contains no messages".to_string()));
        }
        Ok(self.reconcile(result))
    }

    /// Replace every history mail found in the body with the placeholder,
    /// newest history mail first.
    pub fn mask_history(&mut self) {
        let original = ChunkedText::new(self.mail.body.as_str());
        let oracle = self.oracle;
        let placeholder = oracle.placeholder();

        for idx in (0..self.history.len()).rev() {
            let entry = &mut self.history[idx];
            let sim = similarity(&original, &entry.body);
            if sim >= NEAR_DUPLICATE_SIMILARITY {
                trace!(
                    mail_id = self.mail.id,
                    history_mail = entry.mail_id,
                    similarity = sim,
                    "History mail too similar to mask"
                );
                entry.too_similar = true;
                continue;
            }

            let alignment = align(&self.body, &entry.body);
            if alignment.similarity < MASK_SIMILARITY {
                continue;
            }
            debug!(
                mail_id = self.mail.id,
                history_mail = entry.mail_id,
                similarity = alignment.similarity,
                "Masking quoted history mail"
            );
            let text = self.body.text();
            let mut masked = String::with_capacity(text.len() + placeholder.len());
            masked.push_str(&text[..alignment.start]);
            masked.push_str(placeholder);
            masked.push_str(&text[alignment.end..]);
            self.body = ChunkedText::new(masked);
            self.removed.push(idx);
        }
    }

    /// The body as it will be sent to the oracle.
    pub fn masked_body(&self) -> &str {
        self.body.text()
    }

    /// Number of history mails masked so far.
    pub fn masked_count(&self) -> usize {
        self.removed.len()
    }

    pub fn request(&self) -> OracleRequest {
        OracleRequest {
            author: self.mail.name_from.clone(),
            conversation: self.body.text().to_string(),
            subject: self.mail.subject.clone(),
            timestamp: self
                .mail
                .timestamp
                .format(ORACLE_TIMESTAMP_FORMAT)
                .to_string(),
            reply_candidate: self.mail.is_reply_candidate(),
            forward_candidate: self.mail.is_forward_candidate(),
        }
    }

    /// Clean up an oracle result against the history.
    pub fn reconcile(&self, result: ExtractedMessages) -> ExtractedMessages {
        let ExtractedMessages {
            mut messages,
            forwarded,
            forwarded_by,
        } = result;

        // a forward keeps the first masked block
        if forwarded {
            if let Some(&first) = self.removed.first() {
                if let Some(msg) = messages
                    .iter_mut()
                    .find(|m| self.oracle.is_placeholder(&m.content))
                {
                    msg.content = self.history[first].leading.text().to_string();
                }
            }
        }
        messages.retain(|m| !self.oracle.is_placeholder(&m.content));

        if messages.is_empty() {
            return ExtractedMessages {
                forwarded,
                forwarded_by,
                ..ExtractedMessages::single(self.mail.name_from.clone(), "", self.mail.timestamp)
            };
        }

        let known = self.known_messages(&messages);
        if known[0] {
            if let Some(pos) = known.iter().position(|k| !k) {
                debug!(
                    mail_id = self.mail.id,
                    position = pos,
                    "Moving first new message to the front"
                );
                let mut moved: Vec<(String, String)> = messages[..=pos]
                    .iter_mut()
                    .map(|m| (std::mem::take(&mut m.author), std::mem::take(&mut m.content)))
                    .collect();
                moved.rotate_right(1);
                for (msg, (author, content)) in messages.iter_mut().zip(moved) {
                    msg.author = author;
                    msg.content = content;
                }
            }
        }

        ExtractedMessages {
            messages,
            forwarded,
            forwarded_by,
        }
    }

    /// Flag messages repeating a history mail's leading message. Every
    /// history mail matches at most one message.
    fn known_messages(&self, messages: &[inbox_core::Message]) -> Vec<bool> {
        let mut matched = vec![false; self.history.len()];
        messages
            .iter()
            .map(|msg| {
                let chunks = ChunkedText::new(msg.content.as_str());
                for (k, entry) in self.history.iter().enumerate() {
                    if matched[k] || entry.too_similar {
                        continue;
                    }
                    if similarity(&chunks, &entry.leading) >= KNOWN_MESSAGE_SIMILARITY {
                        matched[k] = true;
                        return true;
                    }
                }
                false
            })
            .collect()
    }
}

/// Extract the messages of `mail` given its earlier conversation, oldest first.
pub async fn extract_messages(
    oracle: &dyn ExtractionOracle,
    mail: &Mail,
    history: &[Mail],
    cancel: &CancellationToken,
) -> Result<ExtractedMessages> {
    MessageExtractor::new(oracle, mail, history)
        .extract(cancel)
        .await
}
