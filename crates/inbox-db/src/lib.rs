//! # inbox-db
//!
//! PostgreSQL persistence for inbox-collab.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for mails, threads and rooms
//! - SQL migrations (feature `migrations`)
//! - [`MemoryStore`], an in-memory implementation of every repository
//!
//! ## Example
//!
//! ```rust,ignore
//! use inbox_db::{Database, MailRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/inbox_collab").await?;
//!     db.migrate().await?;
//!
//!     let pending = db.mails.mails_needing_extraction().await?;
//!     println!("{} mails waiting for extraction", pending.len());
//!     Ok(())
//! }
//! ```

pub mod mails;
pub mod memory;
pub mod pool;
pub mod rooms;
pub mod test_fixtures;
pub mod threads;

pub use inbox_core::*;

pub use mails::PgMailRepository;
pub use memory::MemoryStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use rooms::PgRoomRepository;
pub use threads::PgThreadRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub mails: PgMailRepository,
    pub threads: PgThreadRepository,
    pub rooms: PgRoomRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            mails: PgMailRepository::new(pool.clone()),
            threads: PgThreadRepository::new(pool.clone()),
            rooms: PgRoomRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
