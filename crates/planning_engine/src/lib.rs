//! Planning engine: compliance-gated, rate-limited scraping of council portals.
mod batch;
pub mod compliance;
mod context;
mod decode;
mod engine;
mod export;
mod fetch;
mod fleet;
mod orchestrator;
mod parse;
mod persist;
mod progress;
mod rate_limit;
mod retry;
mod source;
mod types;

pub use batch::{process_batch, BatchOptions, BatchProgress, BatchResult};
pub use compliance::{AccessMethod, ComplianceDecision, ComplianceGateway, ComplianceSettings};
pub use context::{EngineContext, SourceEntry};
pub use decode::{decode_body, decode_output, DecodeError, DecodedBody};
pub use engine::{EngineCanceller, EngineCommand, EngineHandle};
pub use export::{write_run_report, ExportError, ExportOptions, ExportSummary};
pub use fetch::{parse_retry_after, FetchRequest, FetchSettings, Fetcher, ReqwestFetcher};
pub use fleet::{AggregateReport, MultiSourceOrchestrator, SourceOutcome};
pub use orchestrator::{SourceRun, SourceRunner, SourceSummary};
pub use parse::{estimate_page_count, FieldSelectors, PageHint, PageParser, SelectorProfile};
pub use persist::{
    ensure_output_dir, invalidation_tags, AtomicFileWriter, CacheInvalidator, JsonLinesSink,
    LoggingInvalidator, MemoryRecordSink, PersistError, RecordSink,
};
pub use progress::{ChannelProgressSink, NullProgressSink, ProgressSink};
pub use rate_limit::{FixedRateLimiter, RateLimiter, TokenBucketLimiter};
pub use retry::{
    fetch_with_retry, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, RETRY_AFTER_CAP_FACTOR,
};
pub use source::{HtmlSource, Source};
pub use types::{
    EngineEvent, FailureKind, FetchError, FetchMetadata, FetchOutput, ScrapeError, Stage,
};
