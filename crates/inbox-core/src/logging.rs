//! Structured logging field names for inbox-collab.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, the stage will retry |
//! | INFO  | Lifecycle events (stage queued/executed, batch completions) |
//! | DEBUG | Decision points (alignment matches, quiet-window waits) |
//! | TRACE | Per-item iteration (chunks, history entries) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "pipeline", "text", "db", "oracle", "notify"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "stage", "extractor", "resolver", "http_oracle", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "extract", "sort", "publish_reply", "update_overview"
pub const OPERATION: &str = "op";

/// Pipeline stage name.
pub const STAGE: &str = "stage";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Mail row id being operated on.
pub const MAIL_ID: &str = "mail_id";

/// Thread row id being operated on.
pub const THREAD_ID: &str = "thread_id";

/// Chat room id.
pub const ROOM_ID: &str = "room_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of history mails considered for masking.
pub const HISTORY_LEN: &str = "history_len";

/// Byte length of the body sent to the oracle.
pub const BODY_LEN: &str = "body_len";

/// Alignment or edit-distance similarity.
pub const SIMILARITY: &str = "similarity";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
