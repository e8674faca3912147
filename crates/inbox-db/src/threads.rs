//! Thread repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{info, instrument};

use inbox_core::{
    display_name, Error, Mail, OverviewEntry, Result, Thread, ThreadNotice, ThreadRepository,
};

const THREAD_COLUMNS: &str =
    "id, enabled, force_close, first_mail, last_mail, last_activity, chat_room_id, chat_message_id";

/// PostgreSQL implementation of ThreadRepository.
#[derive(Clone)]
pub struct PgThreadRepository {
    pool: Pool<Postgres>,
}

impl PgThreadRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> Result<Thread> {
        Ok(Thread {
            id: row.try_get("id")?,
            enabled: row.try_get("enabled")?,
            force_close: row.try_get("force_close")?,
            first_mail: row.try_get("first_mail")?,
            last_mail: row.try_get("last_mail")?,
            last_activity: row.try_get("last_activity")?,
            chat_room_id: row.try_get("chat_room_id")?,
            chat_message_id: row.try_get("chat_message_id")?,
        })
    }
}

#[async_trait]
impl ThreadRepository for PgThreadRepository {
    #[instrument(
        skip(self, head),
        fields(subsystem = "db", component = "threads", op = "create_thread", mail_id = head.id)
    )]
    async fn create_thread(&self, head: &Mail) -> Result<i64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let thread_id: i64 = sqlx::query_scalar(
            "INSERT INTO thread (enabled, force_close, first_mail, last_mail, last_activity)
             VALUES (TRUE, FALSE, $1, $1, $2)
             RETURNING id",
        )
        .bind(head.id)
        .bind(head.timestamp)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let assigned = sqlx::query(
            "UPDATE mail SET thread = $2, sorted = TRUE WHERE id = $1 AND thread IS NULL",
        )
        .bind(head.id)
        .bind(thread_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        if assigned.rows_affected() == 0 {
            // already threaded or gone; the thread would be headless
            tx.rollback().await.map_err(Error::Database)?;
            return Err(Error::InvalidInput(format!(
                "mail {} cannot head a new thread",
                head.id
            )));
        }

        tx.commit().await.map_err(Error::Database)?;
        info!(thread_id, "Created thread");
        Ok(thread_id)
    }

    async fn thread_by_id(&self, id: i64) -> Result<Option<Thread>> {
        let row = sqlx::query(&format!("SELECT {} FROM thread WHERE id = $1", THREAD_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn thread_by_chat_id(
        &self,
        room_id: &str,
        chat_message_id: &str,
    ) -> Result<Option<Thread>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM thread WHERE chat_room_id = $1 AND chat_message_id = $2 LIMIT 1",
            THREAD_COLUMNS
        ))
        .bind(room_id)
        .bind(chat_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn update_last_mail(
        &self,
        thread_id: i64,
        mail_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE thread
             SET enabled = TRUE,
                 last_mail = CASE WHEN $3 >= last_activity THEN $2 ELSE last_mail END,
                 last_activity = GREATEST(last_activity, $3)
             WHERE id = $1",
        )
        .bind(thread_id)
        .bind(mail_id)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::ThreadNotFound(thread_id));
        }
        Ok(())
    }

    async fn threads_ready_for_notification(&self) -> Result<Vec<ThreadNotice>> {
        let rows = sqlx::query(
            "SELECT thread.id, thread.chat_room_id, mail.fetcher, mail.name_from,
                    mail.addr_from, mail.addr_to, mail.subject
             FROM thread
             JOIN mail ON thread.first_mail = mail.id
             WHERE thread.chat_message_id IS NULL
             ORDER BY mail.timestamp, thread.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| -> Result<ThreadNotice> {
                Ok(ThreadNotice {
                    thread_id: row.try_get("id")?,
                    room_id: row.try_get("chat_room_id")?,
                    fetcher: row.try_get("fetcher")?,
                    name_from: row.try_get("name_from")?,
                    addr_from: row.try_get("addr_from")?,
                    addr_to: row.try_get("addr_to")?,
                    subject: row.try_get("subject")?,
                })
            })
            .collect()
    }

    async fn set_thread_chat_ids(
        &self,
        thread_id: i64,
        room_id: &str,
        chat_message_id: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE thread SET chat_room_id = $2, chat_message_id = $3 WHERE id = $1",
        )
        .bind(thread_id)
        .bind(room_id)
        .bind(chat_message_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::ThreadNotFound(thread_id));
        }
        Ok(())
    }

    async fn clear_thread_chat_ids(&self, thread_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let result = sqlx::query("UPDATE thread SET chat_message_id = NULL WHERE id = $1")
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query("UPDATE mail SET chat_message_id = NULL WHERE thread = $1")
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(
        skip(self),
        fields(subsystem = "db", component = "threads", op = "set_thread_enabled")
    )]
    async fn set_thread_enabled(
        &self,
        room_id: &str,
        chat_message_id: &str,
        enabled: bool,
        force_close: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE thread
             SET enabled = $3,
                 force_close = CASE WHEN $3 THEN FALSE WHEN $4 THEN TRUE ELSE force_close END
             WHERE chat_room_id = $1 AND chat_message_id = $2",
        )
        .bind(room_id)
        .bind(chat_message_id)
        .bind(enabled)
        .bind(force_close)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn overview_threads(&self, rooms: &[String]) -> Result<Vec<OverviewEntry>> {
        if rooms.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT thread.id, thread.chat_room_id, thread.chat_message_id, thread.last_activity,
                    mail.name_from, mail.addr_from, mail.subject
             FROM thread
             JOIN mail ON thread.first_mail = mail.id
             WHERE thread.enabled
               AND thread.chat_message_id IS NOT NULL
               AND thread.chat_room_id = ANY($1)
             ORDER BY thread.last_activity DESC, thread.id DESC",
        )
        .bind(rooms)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| -> Result<OverviewEntry> {
                let name_from: String = row.try_get("name_from")?;
                let addr_from: String = row.try_get("addr_from")?;
                Ok(OverviewEntry {
                    thread_id: row.try_get("id")?,
                    author: display_name(&name_from, &addr_from),
                    subject: row.try_get("subject")?,
                    room_id: row.try_get("chat_room_id")?,
                    chat_message_id: row.try_get("chat_message_id")?,
                    last_activity: row.try_get("last_activity")?,
                })
            })
            .collect()
    }
}
