//! Mail repository implementation.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, instrument};

use inbox_core::{
    display_name, Error, ExtractedMessages, Mail, MailRepository, NewMail, ReplyNotice, Result,
};

/// Columns selected for every [`Mail`] row.
pub(crate) const MAIL_COLUMNS: &str = "id, message_id, in_reply_to, header_references, subject, \
     name_from, addr_from, addr_to, timestamp, body, fetcher, attachments, messages, \
     reply_to, thread, sorted, chat_message_id";

/// PostgreSQL implementation of MailRepository.
#[derive(Clone)]
pub struct PgMailRepository {
    pool: Pool<Postgres>,
}

impl PgMailRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch_mails(&self, sql: &str) -> Result<Vec<Mail>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(parse_mail_row).collect()
    }
}

/// Map a row selected with [`MAIL_COLUMNS`].
pub(crate) fn parse_mail_row(row: &PgRow) -> Result<Mail> {
    let messages: Option<Json<ExtractedMessages>> = row.try_get("messages")?;
    Ok(Mail {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        in_reply_to: row.try_get("in_reply_to")?,
        references: row.try_get("header_references")?,
        subject: row.try_get("subject")?,
        name_from: row.try_get("name_from")?,
        addr_from: row.try_get("addr_from")?,
        addr_to: row.try_get("addr_to")?,
        timestamp: row.try_get("timestamp")?,
        body: row.try_get("body")?,
        fetcher: row.try_get("fetcher")?,
        attachments: row.try_get("attachments")?,
        messages: messages.map(|Json(m)| m),
        reply_to: row.try_get("reply_to")?,
        thread: row.try_get("thread")?,
        sorted: row.try_get("sorted")?,
        chat_message_id: row.try_get("chat_message_id")?,
    })
}

#[async_trait]
impl MailRepository for PgMailRepository {
    #[instrument(
        skip(self, mails),
        fields(subsystem = "db", component = "mails", op = "insert_mails", batch = mails.len())
    )]
    async fn insert_mails(&self, mails: &[NewMail]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = 0;
        for mail in mails {
            let result = sqlx::query(
                "INSERT INTO mail (message_id, in_reply_to, header_references, subject, name_from,
                                   addr_from, addr_to, timestamp, body, fetcher, attachments)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (message_id) DO NOTHING",
            )
            .bind(&mail.message_id)
            .bind(&mail.in_reply_to)
            .bind(&mail.references)
            .bind(&mail.subject)
            .bind(&mail.name_from)
            .bind(&mail.addr_from)
            .bind(&mail.addr_to)
            .bind(mail.timestamp)
            .bind(&mail.body)
            .bind(&mail.fetcher)
            .bind(&mail.attachments)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(Error::Database)?;
        debug!(result_count = inserted, "Stored fetched mails");
        Ok(inserted)
    }

    async fn mails_needing_extraction(&self) -> Result<Vec<Mail>> {
        self.fetch_mails(&format!(
            "SELECT {} FROM mail WHERE messages IS NULL ORDER BY timestamp, id",
            MAIL_COLUMNS
        ))
        .await
    }

    async fn mails_needing_sorting(&self) -> Result<Vec<Mail>> {
        self.fetch_mails(&format!(
            "SELECT {} FROM mail WHERE NOT sorted AND messages IS NOT NULL ORDER BY timestamp, id",
            MAIL_COLUMNS
        ))
        .await
    }

    async fn thread_history(&self, thread_id: i64) -> Result<Vec<Mail>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mail WHERE thread = $1 ORDER BY timestamp, id",
            MAIL_COLUMNS
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(parse_mail_row).collect()
    }

    async fn mails_by_message_ids(&self, message_ids: &[String]) -> Result<Vec<Mail>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mail WHERE message_id = ANY($1) ORDER BY timestamp, id",
            MAIL_COLUMNS
        ))
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(parse_mail_row).collect()
    }

    async fn mail_by_id(&self, id: i64) -> Result<Option<Mail>> {
        let row = sqlx::query(&format!("SELECT {} FROM mail WHERE id = $1", MAIL_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(parse_mail_row).transpose()
    }

    async fn mail_by_chat_id(&self, chat_message_id: &str) -> Result<Option<Mail>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM mail WHERE chat_message_id = $1 LIMIT 1",
            MAIL_COLUMNS
        ))
        .bind(chat_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(parse_mail_row).transpose()
    }

    async fn threaded_mails_by_reference_ids(&self, message_ids: &[String]) -> Result<Vec<Mail>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mail
             WHERE thread IS NOT NULL AND message_id = ANY($1)
             ORDER BY timestamp DESC, id DESC",
            MAIL_COLUMNS
        ))
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(parse_mail_row).collect()
    }

    #[instrument(
        skip(self),
        fields(subsystem = "db", component = "mails", op = "link_reply_targets")
    )]
    async fn link_reply_targets(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE mail
             SET reply_to = parent.id
             FROM mail parent
             WHERE mail.thread IS NULL
               AND mail.in_reply_to = parent.message_id
               AND mail.reply_to IS DISTINCT FROM parent.id",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn save_extracted_messages(
        &self,
        mail_id: i64,
        messages: &ExtractedMessages,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE mail SET messages = $2, last_message_extraction = now() WHERE id = $1",
        )
        .bind(mail_id)
        .bind(Json(messages))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::MailNotFound(mail_id));
        }
        Ok(())
    }

    async fn assign_thread(&self, mail_id: i64, thread_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE mail SET thread = COALESCE(thread, $2), sorted = TRUE WHERE id = $1",
        )
        .bind(mail_id)
        .bind(thread_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::MailNotFound(mail_id));
        }
        Ok(())
    }

    async fn mark_sorted_without_thread(&self, mail_id: i64) -> Result<()> {
        sqlx::query("UPDATE mail SET sorted = TRUE WHERE id = $1")
            .bind(mail_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn mails_ready_for_notification(&self) -> Result<Vec<ReplyNotice>> {
        let rows = sqlx::query(
            "SELECT mail.id, mail.name_from, mail.addr_from, mail.subject, mail.timestamp,
                    mail.attachments, mail.messages,
                    thread.chat_room_id, thread.chat_message_id AS root_message_id,
                    mail.id = thread.first_mail AS is_first
             FROM mail
             JOIN thread ON mail.thread = thread.id
             WHERE mail.chat_message_id IS NULL
               AND mail.messages IS NOT NULL
               AND thread.chat_message_id IS NOT NULL
               AND thread.chat_room_id IS NOT NULL
             ORDER BY mail.timestamp, mail.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| -> Result<ReplyNotice> {
                let Json(messages): Json<ExtractedMessages> = row.try_get("messages")?;
                let name_from: String = row.try_get("name_from")?;
                let addr_from: String = row.try_get("addr_from")?;
                Ok(ReplyNotice {
                    mail_id: row.try_get("id")?,
                    room_id: row.try_get("chat_room_id")?,
                    root_message_id: row.try_get("root_message_id")?,
                    name_from: display_name(&name_from, &addr_from),
                    subject: row.try_get("subject")?,
                    timestamp: row.try_get("timestamp")?,
                    attachments: row.try_get("attachments")?,
                    messages,
                    is_first: row.try_get("is_first")?,
                })
            })
            .collect()
    }

    async fn set_mail_chat_id(&self, mail_id: i64, chat_message_id: &str) -> Result<()> {
        sqlx::query("UPDATE mail SET chat_message_id = $2 WHERE id = $1")
            .bind(mail_id)
            .bind(chat_message_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
