//! Planning core: pure domain model shared by the engine and the binary.
mod config;
mod record;
mod slug;
mod stats;
mod status;

pub use config::{
    ConfigIssue, SourceConfig, DEFAULT_DETAIL_CONCURRENCY, DEFAULT_FALLBACK_PAGE_COUNT,
    DEFAULT_MAX_PAGES, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_CONCURRENCY,
    DEFAULT_REQUESTS_PER_SECOND, DEFAULT_TIMEOUT_MS, DEFAULT_USER_AGENT,
};
pub use record::{parse_date, RawRow, Record};
pub use slug::{record_key, record_slug};
pub use stats::{throughput, RunStats, RunStatus};
pub use status::{normalize_status, ApplicationStatus};
