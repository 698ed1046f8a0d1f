use std::fmt;
use std::time::Duration;

use planning_core::ConfigIssue;
use thiserror::Error;

use crate::batch::BatchProgress;
use crate::compliance::ComplianceDecision;
use crate::fleet::AggregateReport;
use crate::orchestrator::SourceSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovering,
    Pages,
    Details,
    Persisting,
    Done,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Progress {
        source_id: String,
        stage: Stage,
        progress: BatchProgress,
    },
    SourceCompleted(SourceSummary),
    RunCompleted(AggregateReport),
    RunRejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub byte_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    RateLimited { retry_after: Option<Duration> },
    Network,
}

impl FailureKind {
    /// Transport failures worth another attempt. Client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureKind::Timeout | FailureKind::Network | FailureKind::RateLimited { .. } => true,
            FailureKind::HttpStatus(code) => *code >= 500 || *code == 408,
            FailureKind::InvalidUrl
            | FailureKind::RedirectLimitExceeded
            | FailureKind::TooLarge { .. }
            | FailureKind::UnsupportedContentType { .. } => false,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::RateLimited { retry_after } => match retry_after {
                Some(after) => write!(f, "rate limited (retry after {}s)", after.as_secs()),
                None => write!(f, "rate limited"),
            },
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("network error: {0}")]
    Network(FetchError),
    #[error("parsing error: {0}")]
    Parsing(String),
    #[error("rate limited by remote")]
    RateLimited { retry_after: Option<Duration> },
    #[error("blocked by compliance policy: {}", .0.reasons.join("; "))]
    ComplianceBlocked(Box<ComplianceDecision>),
    #[error("cancelled")]
    Cancelled,
    #[error("a scrape run is already in progress")]
    AlreadyRunning,
    #[error("unknown source '{0}'")]
    UnknownSource(String),
    #[error("persistence error: {0}")]
    Persist(String),
    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),
}

impl ScrapeError {
    /// Whether the retry policy may attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Network(err) => err.kind.is_retryable(),
            ScrapeError::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Minimum wait the remote asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ScrapeError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, ScrapeError::ComplianceBlocked(_))
    }

    pub fn alternatives(&self) -> Vec<String> {
        match self {
            ScrapeError::ComplianceBlocked(decision) => {
                decision.alternatives.clone().unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }
}

impl From<ConfigIssue> for ScrapeError {
    fn from(issue: ConfigIssue) -> Self {
        ScrapeError::InvalidConfig(issue.to_string())
    }
}

impl From<FetchError> for ScrapeError {
    fn from(err: FetchError) -> Self {
        match err.kind {
            FailureKind::RateLimited { retry_after } => ScrapeError::RateLimited { retry_after },
            _ => ScrapeError::Network(err),
        }
    }
}
