//! # inbox-jobs
//!
//! The inbox-collab processing pipeline.
//!
//! This crate provides:
//! - Coalescing pipeline stages with retry and blocking queueing
//! - Message extraction in per-conversation batches
//! - Thread sorting (the thread resolver)
//! - Chat notification and per-room overview stages
//! - Operator thread actions
//!
//! ## Example
//!
//! ```ignore
//! use inbox_jobs::{Pipeline, PipelineDeps};
//!
//! let pipeline = Pipeline::new(config, PipelineDeps::from_store(store, oracle, sink));
//! pipeline.start();
//!
//! // Listen for stage events
//! let mut events = pipeline.sorting_stage().events();
//! pipeline.store_mails(&fetched).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! pipeline.shutdown().await;
//! ```

pub mod actions;
pub mod extraction;
pub mod ingest;
pub mod notification;
pub mod overview;
pub mod pipeline;
pub mod sorting;
pub mod stage;

// Re-export core types
pub use inbox_core::*;

pub use actions::PipelineThreadActions;
pub use extraction::{conversation_batches, load_history, ExtractionWork};
pub use ingest::{MailIngest, MailboxActivity};
pub use notification::NotificationWork;
pub use overview::{OverviewStages, OverviewWork};
pub use pipeline::{Pipeline, PipelineDeps};
pub use sorting::{SortingWork, ThreadAssignment, ThreadResolver};
pub use stage::{cancellable_sleep, Stage, StageContext, StageEvent, StageWork};
