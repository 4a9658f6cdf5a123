//! Centralized default constants for briefroom.
//!
//! Crates reference these instead of defining their own magic numbers.

// =============================================================================
// INGESTION RUNS
// =============================================================================

/// Wall-clock budget of one `run` invocation, in seconds. Kept below typical
/// serverless invocation timeouts.
pub const RUN_TIME_BUDGET_SECS: u64 = 20;

/// Largest time budget a single run slice may be given.
pub const MAX_RUN_TIME_BUDGET_SECS: u64 = 900;

/// Delay between two polls of the same import operation.
pub const POLL_INTERVAL_MS: u64 = 3_000;

/// Polls of one operation within a single slice.
pub const POLL_ATTEMPTS_PER_SLICE: u32 = 10;

/// Polls of one operation across all slices before the document is failed.
pub const MAX_POLL_ATTEMPTS: i32 = 60;

/// Default page size for the event tail.
pub const EVENT_PAGE_LIMIT: i64 = 500;

/// Upper bound accepted for an event page.
pub const EVENT_PAGE_LIMIT_MAX: i64 = 5_000;

// =============================================================================
// EXTERNAL SERVICES
// =============================================================================

/// File-search REST base.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// File-search upload base.
pub const GEMINI_UPLOAD_BASE_URL: &str = "https://generativelanguage.googleapis.com/upload/v1beta";

/// Request timeout for the file-search service.
pub const GEMINI_TIMEOUT_SECS: u64 = 120;

/// Object-storage bucket holding document bytes.
pub const STORAGE_BUCKET: &str = "documents";

/// Request timeout for document downloads.
pub const STORAGE_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default database pool size.
pub const DB_MAX_CONNECTIONS: u32 = 5;
