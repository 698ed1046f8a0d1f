//! Process-wide collaborators, built once at startup and handed down.

use std::sync::Arc;

use engine_logging::engine_info;
use planning_core::SourceConfig;
use serde::{Deserialize, Serialize};

use crate::compliance::{
    ComplianceGateway, ComplianceSettings, ConsentStore, EgressPath, TermsRegistry,
};
use crate::fetch::Fetcher;
use crate::fleet::MultiSourceOrchestrator;
use crate::orchestrator::SourceRunner;
use crate::parse::SelectorProfile;
use crate::persist::{CacheInvalidator, RecordSink};
use crate::source::HtmlSource;
use crate::types::ScrapeError;

/// A configured portal: where it is and how to read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub config: SourceConfig,
    #[serde(default)]
    pub profile: SelectorProfile,
    /// Token-bucket burst size; a fixed-rate limiter when absent.
    #[serde(default)]
    pub burst: Option<u32>,
}

impl SourceEntry {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            profile: SelectorProfile::default(),
            burst: None,
        }
    }
}

#[derive(Clone)]
pub struct EngineContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub gateway: Arc<ComplianceGateway>,
    pub records: Arc<dyn RecordSink>,
    pub invalidator: Arc<dyn CacheInvalidator>,
    /// Root for canonical record URLs.
    pub site_root: String,
}

impl EngineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        settings: ComplianceSettings,
        terms: TermsRegistry,
        consent: Arc<ConsentStore>,
        egress: Vec<EgressPath>,
        records: Arc<dyn RecordSink>,
        invalidator: Arc<dyn CacheInvalidator>,
        site_root: impl Into<String>,
    ) -> Self {
        let gateway = Arc::new(ComplianceGateway::new(
            settings,
            fetcher.clone(),
            terms,
            consent,
            egress,
        ));
        Self {
            fetcher,
            gateway,
            records,
            invalidator,
            site_root: site_root.into(),
        }
    }

    pub fn html_source(&self, entry: &SourceEntry) -> Result<HtmlSource, ScrapeError> {
        entry.config.validate()?;
        let source = HtmlSource::new(
            Arc::new(entry.config.clone()),
            &entry.profile,
            self.fetcher.clone(),
            self.gateway.clone(),
            self.site_root.clone(),
        )?;
        Ok(match entry.burst {
            Some(capacity) => source.with_burst(capacity),
            None => source,
        })
    }

    /// Build the multi-source orchestrator. Any invalid entry fails the whole
    /// registry; duplicated ids are rejected too.
    pub fn orchestrator(
        &self,
        entries: &[SourceEntry],
    ) -> Result<MultiSourceOrchestrator, ScrapeError> {
        let mut runners = Vec::with_capacity(entries.len());
        for entry in entries {
            if runners
                .iter()
                .any(|runner: &SourceRunner| runner.source_id() == entry.config.id)
            {
                return Err(ScrapeError::InvalidConfig(format!(
                    "duplicate source id '{}'",
                    entry.config.id
                )));
            }
            runners.push(SourceRunner::new(Arc::new(self.html_source(entry)?)));
        }
        engine_info!("registered {} sources", runners.len());
        Ok(MultiSourceOrchestrator::new(
            runners,
            self.records.clone(),
            self.invalidator.clone(),
        ))
    }
}
