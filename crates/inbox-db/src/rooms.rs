//! Room repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use inbox_core::{Error, Result, Room, RoomRepository};

/// PostgreSQL implementation of RoomRepository.
#[derive(Clone)]
pub struct PgRoomRepository {
    pool: Pool<Postgres>,
}

impl PgRoomRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn ensure_rooms(&self, room_ids: &[String]) -> Result<()> {
        if room_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("INSERT INTO room (id) SELECT UNNEST($1::text[]) ON CONFLICT (id) DO NOTHING")
            .bind(room_ids)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn rooms(&self, room_ids: &[String]) -> Result<Vec<Room>> {
        if room_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, name, overview_message_id FROM room WHERE id = ANY($1) ORDER BY id",
        )
        .bind(room_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| -> Result<Room> {
                Ok(Room {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    overview_message_id: row.try_get("overview_message_id")?,
                })
            })
            .collect()
    }

    async fn set_room_name(&self, room_id: &str, name: &str) -> Result<()> {
        sqlx::query("UPDATE room SET name = $2 WHERE id = $1")
            .bind(room_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn overview_message_id(&self, room_id: &str) -> Result<Option<String>> {
        let id: Option<Option<String>> =
            sqlx::query_scalar("SELECT overview_message_id FROM room WHERE id = $1")
                .bind(room_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(id.flatten())
    }

    async fn set_overview_message_id(
        &self,
        room_id: &str,
        message_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO room (id, overview_message_id) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET overview_message_id = EXCLUDED.overview_message_id",
        )
        .bind(room_id)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
