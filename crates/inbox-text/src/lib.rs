//! # inbox-text
//!
//! Quote detection and message extraction for inbox-collab.
//!
//! This crate provides:
//! - Normalization and whitespace chunking of mail bodies
//! - Local alignment (Smith-Waterman) to locate quoted blocks
//! - Chunk-level edit distance for near-duplicate detection
//! - The message extractor that masks quoted history before calling the
//!   extraction oracle and reconciles its answer
//!
//! ## Example
//!
//! ```
//! use inbox_text::{align, chunk};
//!
//! let body = chunk("Thanks!\n> I love go! :)");
//! let quote = chunk("I love go! :)");
//! let found = align(&body, &quote);
//! assert_eq!(found.similarity, 1.0);
//! assert_eq!(&body.text()[found.start..found.end], "I love go! :)");
//! ```

pub mod align;
pub mod chunk;
pub mod extractor;
pub mod normalize;
pub mod similarity;

pub use align::{align, Alignment};
pub use chunk::{chunk, Chunk, ChunkedText};
pub use extractor::{extract_messages, MessageExtractor};
pub use normalize::normalize;
pub use similarity::similarity;
