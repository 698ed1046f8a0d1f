use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use engine_logging::{engine_debug, engine_warn};
use planning_core::{normalize_status, ApplicationStatus, RawRow, Record, SourceConfig};

use crate::compliance::ComplianceGateway;
use crate::decode::{decode_output, DecodedBody};
use crate::fetch::{FetchRequest, Fetcher};
use crate::parse::{estimate_page_count, PageParser, SelectorProfile};
use crate::rate_limit::{FixedRateLimiter, RateLimiter, TokenBucketLimiter};
use crate::retry::RetryPolicy;
use crate::types::ScrapeError;

/// One external portal. Orchestration is written once against this trait.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    fn config(&self) -> &SourceConfig;

    fn id(&self) -> &str {
        &self.config().id
    }

    /// Number of result pages for applications received since `from_date`.
    async fn discover_page_count(&self, from_date: NaiveDate) -> Result<u32, ScrapeError>;

    async fn fetch_page(&self, from_date: NaiveDate, page: u32)
        -> Result<Vec<RawRow>, ScrapeError>;

    /// `Ok(None)` when the detail page is not parseable; the caller drops it.
    async fn fetch_detail(&self, reference: &str) -> Result<Option<Record>, ScrapeError>;

    fn normalize_status(&self, text: &str) -> ApplicationStatus {
        normalize_status(text)
    }

    /// Root under which canonical record URLs are built.
    fn site_root(&self) -> &str;

    /// Normalize raw rows, dropping those without a reference.
    fn normalize_rows(&self, rows: &[RawRow]) -> Vec<Record> {
        rows.iter()
            .filter_map(|row| {
                Record::from_row(row, self.id(), self.site_root(), |text| {
                    self.normalize_status(text)
                })
            })
            .collect()
    }
}

/// Generic portal scraper driven by URL templates and a [`SelectorProfile`].
pub struct HtmlSource {
    config: Arc<SourceConfig>,
    parser: PageParser,
    fetcher: Arc<dyn Fetcher>,
    gateway: Arc<ComplianceGateway>,
    retry: RetryPolicy,
    site_root: String,
    limiter: Arc<dyn RateLimiter>,
    /// Search page 1 as downloaded during discovery, keyed by its URL.
    first_page: Mutex<Option<(String, String)>>,
}

impl HtmlSource {
    pub fn new(
        config: Arc<SourceConfig>,
        profile: &SelectorProfile,
        fetcher: Arc<dyn Fetcher>,
        gateway: Arc<ComplianceGateway>,
        site_root: impl Into<String>,
    ) -> Result<Self, ScrapeError> {
        let retry = RetryPolicy::new(config.max_retries, crate::retry::DEFAULT_BASE_DELAY);
        let limiter = Arc::new(FixedRateLimiter::new(config.requests_per_second));
        Ok(Self {
            parser: PageParser::new(profile)?,
            config,
            fetcher,
            gateway,
            retry,
            site_root: site_root.into(),
            limiter,
            first_page: Mutex::new(None),
        })
    }

    /// Use a token bucket admitting bursts of `capacity` instead of a fixed rate.
    pub fn with_burst(mut self, capacity: u32) -> Self {
        self.limiter = Arc::new(TokenBucketLimiter::new(
            capacity,
            self.config.requests_per_second,
        ));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// Follow the gateway's rate, which tightens when robots.txt asks for a
    /// crawl delay and relaxes again when it stops asking.
    fn throttle_to(&self, rate: f64) {
        if (self.limiter.rate() - rate).abs() > f64::EPSILON {
            engine_debug!("{}: throttling at {:.3} req/s", self.config.id, rate);
            self.limiter.set_rate(rate);
        }
    }

    fn lock_first_page(&self) -> std::sync::MutexGuard<'_, Option<(String, String)>> {
        self.first_page
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand out the page saved by discovery, once.
    fn take_first_page(&self, url: &str) -> Option<String> {
        let mut slot = self.lock_first_page();
        if slot.as_ref().is_some_and(|(saved, _)| saved == url) {
            slot.take().map(|(_, text)| text)
        } else {
            None
        }
    }

    /// Gate, throttle, fetch and decode one URL. Never retries.
    async fn load(&self, url: &str) -> Result<DecodedBody, ScrapeError> {
        let decision = self
            .gateway
            .evaluate(url, &self.config)
            .await
            .ensure_allowed()?;
        let rate = decision
            .effective_rate_limit
            .unwrap_or(self.config.requests_per_second);
        self.throttle_to(rate);
        self.limiter.acquire().await;

        let request = FetchRequest::get(url, self.config.timeout())
            .with_headers(decision.header_pairs())
            .via(decision.egress.as_ref().map(|path| path.proxy_url.clone()));
        let result = self.fetcher.fetch(&request).await;
        self.gateway.record_egress_outcome(&decision, result.is_ok());

        let body = decode_output(&result?)?;
        if body.lossy {
            engine_warn!("{}: {} decoded lossily as {}", self.config.id, url, body.encoding_label);
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl Source for HtmlSource {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn discover_page_count(&self, from_date: NaiveDate) -> Result<u32, ScrapeError> {
        let url = self.config.search_url_for(from_date, 1);
        let body = self.retry.run(|_| self.load(&url)).await?;
        let hint = self.parser.page_hint(&body.text);
        *self.lock_first_page() = Some((url, body.text));
        let pages = estimate_page_count(&hint, self.config.page_size, self.config.fallback_page_count);
        if hint.last_page.is_none() && hint.result_total.is_none() {
            engine_warn!(
                "{}: no pagination or result count on first page; assuming {} pages",
                self.config.id,
                pages
            );
        }
        Ok(pages)
    }

    async fn fetch_page(
        &self,
        from_date: NaiveDate,
        page: u32,
    ) -> Result<Vec<RawRow>, ScrapeError> {
        let url = self.config.search_url_for(from_date, page);
        if let Some(text) = self.take_first_page(&url) {
            engine_debug!("{}: reusing discovery download for page {}", self.config.id, page);
            return self.parser.rows(&text, &url);
        }
        let body = self.load(&url).await?;
        self.parser.rows(&body.text, &url)
    }

    async fn fetch_detail(&self, reference: &str) -> Result<Option<Record>, ScrapeError> {
        let url = self.config.detail_url_for(reference);
        let body = self.load(&url).await?;
        let Some(mut raw) = self.parser.detail(&body.text) else {
            engine_debug!("{}: detail page for {} not parseable", self.config.id, reference);
            return Ok(None);
        };
        raw.detail_href = Some(url);
        Ok(self.normalize_rows(std::slice::from_ref(&raw)).into_iter().next())
    }

    fn site_root(&self) -> &str {
        &self.site_root
    }
}
