//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;
use planning_core::{RawRow, Record, SourceConfig};
use planning_engine::{
    CacheInvalidator, EngineEvent, FailureKind, FetchError, FetchMetadata, FetchOutput,
    FetchRequest, Fetcher, ProgressSink, ScrapeError, Source,
};

pub fn date(text: &str) -> NaiveDate {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
}

pub fn row(reference: &str) -> RawRow {
    RawRow {
        reference: Some(reference.to_string()),
        address: Some(format!("{reference} Station Road")),
        proposal: Some("Single storey rear extension".to_string()),
        status: Some("Approved".to_string()),
        received: Some("01/03/2024".to_string()),
        ..RawRow::default()
    }
}

/// A row the portal printed without a reference.
pub fn blank_row() -> RawRow {
    RawRow {
        address: Some("Land off Mill Lane".to_string()),
        ..RawRow::default()
    }
}

pub fn rows(prefix: &str, count: usize) -> Vec<RawRow> {
    (1..=count).map(|n| row(&format!("{prefix}/{n:03}"))).collect()
}

/// In-memory portal: pages of rows, optional failures and latency.
pub struct ScriptedSource {
    config: SourceConfig,
    pages: Vec<Vec<RawRow>>,
    failing_pages: HashMap<u32, ScrapeError>,
    discovery_error: Option<ScrapeError>,
    claimed_pages: Option<u32>,
    details: HashMap<String, RawRow>,
    failing_details: HashMap<String, ScrapeError>,
    delay: Duration,
    panics: bool,
    pub discovery_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(id: &str, pages: Vec<Vec<RawRow>>) -> Self {
        let mut config = SourceConfig::new(id, format!("https://{id}.example.gov.uk"));
        config.page_concurrency = 2;
        Self {
            config,
            pages,
            failing_pages: HashMap::new(),
            discovery_error: None,
            claimed_pages: None,
            details: HashMap::new(),
            failing_details: HashMap::new(),
            delay: Duration::ZERO,
            panics: false,
            discovery_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_page(mut self, page: u32, err: ScrapeError) -> Self {
        self.failing_pages.insert(page, err);
        self
    }

    pub fn failing_discovery(mut self, err: ScrapeError) -> Self {
        self.discovery_error = Some(err);
        self
    }

    /// Report `pages` from discovery whatever the scripted pages are.
    pub fn claiming_pages(mut self, pages: u32) -> Self {
        self.claimed_pages = Some(pages);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    pub fn with_details(mut self) -> Self {
        self.config.fetch_details = true;
        self
    }

    /// Detail page content for a reference, instead of its listing row.
    pub fn detail(mut self, row: RawRow) -> Self {
        let reference = row.reference.clone().unwrap_or_default();
        self.details.insert(reference, row);
        self
    }

    pub fn failing_detail(mut self, reference: &str, err: ScrapeError) -> Self {
        self.failing_details.insert(reference.to_string(), err);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_page_concurrency(mut self, concurrency: usize) -> Self {
        self.config.page_concurrency = concurrency;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

#[async_trait::async_trait]
impl Source for ScriptedSource {
    fn config(&self) -> &SourceConfig {
        &self.config
    }

    async fn discover_page_count(&self, _from_date: NaiveDate) -> Result<u32, ScrapeError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("scripted source {} exploded", self.config.id);
        }
        match self.discovery_error.as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(self.claimed_pages.unwrap_or(self.pages.len() as u32)),
        }
    }

    async fn fetch_page(
        &self,
        _from_date: NaiveDate,
        page: u32,
    ) -> Result<Vec<RawRow>, ScrapeError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = self.failing_pages.get(&page) {
            return Err(err.clone());
        }
        self.pages
            .get(page as usize - 1)
            .cloned()
            .ok_or_else(|| ScrapeError::Parsing(format!("no page {page}")))
    }

    async fn fetch_detail(&self, reference: &str) -> Result<Option<Record>, ScrapeError> {
        if let Some(err) = self.failing_details.get(reference) {
            return Err(err.clone());
        }
        let found = self.details.get(reference).cloned().or_else(|| {
            self.pages
                .iter()
                .flatten()
                .find(|row| row.reference.as_deref() == Some(reference))
                .cloned()
        });
        Ok(found.and_then(|row| self.normalize_rows(&[row]).into_iter().next()))
    }

    fn site_root(&self) -> &str {
        "https://planning.example.org"
    }
}

/// Collects every emitted event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingInvalidator {
    tags: Mutex<Vec<String>>,
}

impl RecordingInvalidator {
    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, tags: &[String]) {
        self.tags.lock().unwrap().extend(tags.iter().cloned());
    }
}

/// Canned responses keyed by URL; anything unknown is a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Result<String, FailureKind>>>,
    calls: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(self, url: &str, body: &str) -> Self {
        self.replace_body(url, body);
        self
    }

    pub fn failure(self, url: &str, kind: FailureKind) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(kind));
        self
    }

    /// Change what `url` serves from now on.
    pub fn replace_body(&self, url: &str, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(body.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.url.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutput, FetchError> {
        self.calls.lock().unwrap().push(request.clone());
        let response = self.responses.lock().unwrap().get(&request.url).cloned();
        match response {
            Some(Ok(body)) => Ok(FetchOutput {
                bytes: body.as_bytes().to_vec(),
                metadata: FetchMetadata {
                    original_url: request.url.clone(),
                    final_url: request.url.clone(),
                    status: 200,
                    content_type: Some("text/plain; charset=utf-8".to_string()),
                    byte_len: body.len() as u64,
                },
            }),
            Some(Err(kind)) => Err(FetchError::new(kind, "scripted failure")),
            None => Err(FetchError::new(FailureKind::HttpStatus(404), "not found")),
        }
    }
}
