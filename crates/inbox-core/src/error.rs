//! Error types for inbox-collab.

use thiserror::Error;

/// Result type alias using inbox-collab's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for inbox-collab operations.
///
/// Everything except [`Error::Config`] is treated as transient by the
/// pipeline: the owning stage retries the same input from fresh state.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Mail not found
    #[error("Mail not found: {0}")]
    MailNotFound(i64),

    /// Thread not found
    #[error("Thread not found: {0}")]
    ThreadNotFound(i64),

    /// The extraction oracle failed or returned an unusable response
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Publishing to the chat layer failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// The operation observed cancellation and gave up
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::Config(_) | Error::InvalidInput(_) | Error::Cancelled(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::Config(e.to_string())
    }
}
