use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 1.0;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PAGE_CONCURRENCY: usize = 4;
pub const DEFAULT_DETAIL_CONCURRENCY: usize = 2;
pub const DEFAULT_FALLBACK_PAGE_COUNT: u32 = 10;
pub const DEFAULT_MAX_PAGES: u32 = 500;
pub const DEFAULT_USER_AGENT: &str = "PlanningDataBot/1.0";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigIssue {
    #[error("source id must not be empty")]
    EmptyId,
    #[error("source {id}: invalid base url '{url}'")]
    InvalidBaseUrl { id: String, url: String },
    #[error("source {id}: requests_per_second must be positive")]
    NonPositiveRate { id: String },
    #[error("source {id}: {field} must be at least 1")]
    ZeroConcurrency { id: String, field: &'static str },
    #[error("source {id}: search url template lacks {{page}}")]
    MissingPagePlaceholder { id: String },
}

/// Per-source scrape settings. Shared behind an `Arc` once built; nothing
/// mutates it after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_rate")]
    pub requests_per_second: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_page_concurrency")]
    pub page_concurrency: usize,
    #[serde(default = "default_detail_concurrency")]
    pub detail_concurrency: usize,
    /// Template with `{base}`, `{from_date}` (ISO) and `{page}` placeholders.
    #[serde(default = "default_search_url")]
    pub search_url: String,
    /// Template with `{base}` and `{reference}` placeholders.
    #[serde(default = "default_detail_url")]
    pub detail_url: String,
    /// Rows per result page, used to estimate page count from a result total.
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default = "default_fallback_pages")]
    pub fallback_page_count: u32,
    /// Ceiling on result pages fetched per run, whatever the portal claims.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Follow every listed reference to its detail page after the listing.
    #[serde(default)]
    pub fetch_details: bool,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: base_url.into(),
            requests_per_second: default_rate(),
            max_retries: default_max_retries(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            page_concurrency: default_page_concurrency(),
            detail_concurrency: default_detail_concurrency(),
            search_url: default_search_url(),
            detail_url: default_detail_url(),
            page_size: None,
            fallback_page_count: default_fallback_pages(),
            max_pages: default_max_pages(),
            fetch_details: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Result<(), ConfigIssue> {
        if self.id.trim().is_empty() {
            return Err(ConfigIssue::EmptyId);
        }
        if Url::parse(&self.base_url).is_err() {
            return Err(ConfigIssue::InvalidBaseUrl {
                id: self.id.clone(),
                url: self.base_url.clone(),
            });
        }
        if !(self.requests_per_second > 0.0) {
            return Err(ConfigIssue::NonPositiveRate {
                id: self.id.clone(),
            });
        }
        if self.page_concurrency == 0 {
            return Err(ConfigIssue::ZeroConcurrency {
                id: self.id.clone(),
                field: "page_concurrency",
            });
        }
        if self.detail_concurrency == 0 {
            return Err(ConfigIssue::ZeroConcurrency {
                id: self.id.clone(),
                field: "detail_concurrency",
            });
        }
        if self.max_pages == 0 {
            return Err(ConfigIssue::ZeroConcurrency {
                id: self.id.clone(),
                field: "max_pages",
            });
        }
        if !self.search_url.contains("{page}") {
            return Err(ConfigIssue::MissingPagePlaceholder {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    pub fn search_url_for(&self, from_date: NaiveDate, page: u32) -> String {
        self.search_url
            .replace("{base}", self.base_url.trim_end_matches('/'))
            .replace("{from_date}", &from_date.format("%Y-%m-%d").to_string())
            .replace("{page}", &page.to_string())
    }

    pub fn detail_url_for(&self, reference: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(reference.as_bytes()).collect();
        self.detail_url
            .replace("{base}", self.base_url.trim_end_matches('/'))
            .replace("{reference}", &encoded)
    }
}

fn default_rate() -> f64 {
    DEFAULT_REQUESTS_PER_SECOND
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_page_concurrency() -> usize {
    DEFAULT_PAGE_CONCURRENCY
}

fn default_detail_concurrency() -> usize {
    DEFAULT_DETAIL_CONCURRENCY
}

fn default_search_url() -> String {
    "{base}/search?received_from={from_date}&page={page}".to_string()
}

fn default_detail_url() -> String {
    "{base}/applications/{reference}".to_string()
}

fn default_fallback_pages() -> u32 {
    DEFAULT_FALLBACK_PAGE_COUNT
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}
