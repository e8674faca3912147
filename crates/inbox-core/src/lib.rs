//! # inbox-core
//!
//! Core types, traits, and configuration for inbox-collab.
//!
//! This crate provides the data model (mails, threads, extracted messages),
//! the error type, and the trait seams the pipeline depends on: storage
//! repositories, the extraction oracle, the chat notification sink, the mail
//! sender, and the operator-facing [`ThreadActions`].

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::AppConfig;
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
