//! Centralized default constants for inbox-collab.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// EXTRACTION
// =============================================================================

/// Edit-distance similarity at which a history mail counts as a near-duplicate
/// of the mail being extracted (and is excluded from masking).
pub const NEAR_DUPLICATE_SIMILARITY: f32 = 0.8;

/// Alignment similarity required to mask a quoted history block.
pub const MASK_SIMILARITY: f32 = 0.85;

/// Edit-distance similarity at which an oracle message repeats known content.
pub const KNOWN_MESSAGE_SIMILARITY: f32 = 0.9;

/// Delay before re-queueing extraction after a failed thread batch (seconds).
pub const EXTRACTION_RETRY_DELAY_SECS: u64 = 5;

/// Interval for queueing extraction of mail stored by external fetchers (seconds).
pub const EXTRACTION_POLL_INTERVAL_SECS: u64 = 60;

/// Timestamp format sent to the extraction oracle.
pub const ORACLE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M";

// =============================================================================
// ORACLE
// =============================================================================

/// Default extraction oracle base URL.
pub const ORACLE_URL: &str = "http://127.0.0.1:8000";

/// Endpoint appended to the oracle base URL.
pub const ORACLE_ENDPOINT: &str = "parse_messages";

/// Timeout for a single oracle request (seconds).
pub const ORACLE_TIMEOUT_SECS: u64 = 300;

/// Requests slower than this are logged as slow (milliseconds).
pub const ORACLE_SLOW_MS: u64 = 30_000;

// =============================================================================
// THREAD SORTING
// =============================================================================

/// Quiet window after the last mailbox update before threads are sorted (seconds).
pub const SORT_QUIET_WINDOW_SECS: u64 = 5;

/// Hard upper bound on waiting for the quiet window (seconds).
pub const SORT_TIMEOUT_SECS: u64 = 120;

/// Sleep between quiet-window checks (seconds).
pub const SORT_WAIT_POLL_SECS: u64 = 2;

// =============================================================================
// NOTIFICATION
// =============================================================================

/// Delay before retrying after the chat layer rejected a publish (seconds).
pub const NOTIFY_RETRY_DELAY_SECS: u64 = 3;

/// Timeout for a single webhook delivery (seconds).
pub const NOTIFY_TIMEOUT_SECS: u64 = 30;

/// Interval between room display name refreshes (seconds).
pub const ROOM_NAME_REFRESH_SECS: u64 = 300;

/// Pause after a thread move before reporting success (seconds).
pub const MOVE_SETTLE_SECS: u64 = 2;

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL.
pub const DATABASE_URL: &str = "postgres://localhost/inbox_collab";

/// Default maximum pool connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

// =============================================================================
// STAGES
// =============================================================================

/// Capacity of the stage event broadcast channel.
pub const STAGE_EVENT_CAPACITY: usize = 256;

/// Default config file location, relative to the working directory.
pub const CONFIG_PATH: &str = "config/config.toml";
