//! Pre-dispatch gate for automated collection.
//!
//! Every target URL passes robots.txt, terms-of-service and consent checks, in
//! that order, before a request may be sent. The first blocking check ends the
//! evaluation. A passing decision carries the effective request rate, the
//! identification headers to send, and optionally an egress path.

mod consent;
mod egress;
mod robots;
mod terms;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use engine_logging::{engine_debug, engine_warn};
use planning_core::SourceConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::fetch::Fetcher;
use crate::types::ScrapeError;

pub use consent::{ConsentRecord, ConsentStatus, ConsentStore};
pub use egress::{EgressPath, EgressPool, DEFAULT_MIN_ETHICAL_SCORE};
pub use robots::{RobotsCache, RobotsGroup, RobotsStatus, RobotsTxt, DEFAULT_ROBOTS_TTL};
pub use terms::{
    is_government_domain, AssessmentBasis, ScrapingStance, TermsAssessment, TermsEntry,
    TermsRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMethod {
    Direct,
    Api,
    Proxy,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceDecision {
    pub url: String,
    pub allowed: bool,
    pub method: AccessMethod,
    pub reasons: Vec<String>,
    pub alternatives: Option<Vec<String>>,
    pub effective_rate_limit: Option<f64>,
    pub headers: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub egress: Option<EgressPath>,
}

impl ComplianceDecision {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            allowed: false,
            method: AccessMethod::Blocked,
            reasons: Vec::new(),
            alternatives: None,
            effective_rate_limit: None,
            headers: BTreeMap::new(),
            warnings: Vec::new(),
            egress: None,
        }
    }

    fn block(mut self, reason: String, alternatives: Vec<String>) -> Self {
        self.allowed = false;
        if self.method != AccessMethod::Api {
            self.method = AccessMethod::Blocked;
        }
        self.reasons.push(reason);
        if !alternatives.is_empty() {
            self.alternatives = Some(alternatives);
        }
        self
    }

    /// Turn a blocked decision into the error callers must not retry.
    pub fn ensure_allowed(self) -> Result<Self, ScrapeError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(ScrapeError::ComplianceBlocked(Box::new(self)))
        }
    }

    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSettings {
    /// Contact address sent in `From` and embedded in the agent string.
    pub contact: String,
    /// Human-readable reason for collection, sent with every request.
    pub purpose: String,
    #[serde(default = "default_true")]
    pub require_consent: bool,
    #[serde(default = "default_min_score")]
    pub min_ethical_score: u8,
    #[serde(default)]
    pub use_egress_pool: bool,
    #[serde(default = "default_robots_ttl_secs")]
    pub robots_ttl_secs: u64,
    #[serde(default = "default_robots_timeout_ms")]
    pub robots_timeout_ms: u64,
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        Self {
            contact: "data@planning-data.example".to_string(),
            purpose: "Public planning application index".to_string(),
            require_consent: true,
            min_ethical_score: DEFAULT_MIN_ETHICAL_SCORE,
            use_egress_pool: false,
            robots_ttl_secs: default_robots_ttl_secs(),
            robots_timeout_ms: default_robots_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_score() -> u8 {
    DEFAULT_MIN_ETHICAL_SCORE
}

fn default_robots_ttl_secs() -> u64 {
    DEFAULT_ROBOTS_TTL.as_secs()
}

fn default_robots_timeout_ms() -> u64 {
    10_000
}

pub struct ComplianceGateway {
    settings: ComplianceSettings,
    robots: RobotsCache,
    terms: TermsRegistry,
    consent: Arc<ConsentStore>,
    egress: EgressPool,
}

impl ComplianceGateway {
    pub fn new(
        settings: ComplianceSettings,
        fetcher: Arc<dyn Fetcher>,
        terms: TermsRegistry,
        consent: Arc<ConsentStore>,
        egress_paths: Vec<EgressPath>,
    ) -> Self {
        let robots = RobotsCache::new(
            fetcher,
            Duration::from_secs(settings.robots_ttl_secs),
            Duration::from_millis(settings.robots_timeout_ms),
            planning_core::DEFAULT_USER_AGENT,
        );
        let egress = EgressPool::new(egress_paths, settings.min_ethical_score);
        Self {
            settings,
            robots,
            terms,
            consent,
            egress,
        }
    }

    pub fn settings(&self) -> &ComplianceSettings {
        &self.settings
    }

    pub fn robots(&self) -> &RobotsCache {
        &self.robots
    }

    pub fn consent(&self) -> &ConsentStore {
        &self.consent
    }

    pub fn record_egress_outcome(&self, decision: &ComplianceDecision, success: bool) {
        if let Some(path) = decision.egress.as_ref() {
            self.egress.record_outcome(&path.id, success);
        }
    }

    /// The `User-Agent` sent for `source`: its own token plus contact and purpose.
    pub fn agent_string(&self, source: &SourceConfig) -> String {
        format!(
            "{} (+mailto:{}; {})",
            source.user_agent, self.settings.contact, self.settings.purpose
        )
    }

    pub async fn evaluate(&self, target: &str, source: &SourceConfig) -> ComplianceDecision {
        let decision = ComplianceDecision::new(target);
        let url = match Url::parse(target) {
            Ok(url) => url,
            Err(err) => return decision.block(format!("invalid url: {err}"), Vec::new()),
        };
        let Some(host) = url.host_str().map(str::to_string) else {
            return decision.block("url has no host".to_string(), Vec::new());
        };

        let decision = self.evaluate_inner(decision, &url, &host, source).await;
        if decision.allowed {
            engine_debug!("compliance ok for {} via {:?}", target, decision.method);
        } else {
            engine_warn!(
                "compliance blocked {}: {}",
                target,
                decision.reasons.join("; ")
            );
        }
        decision
    }

    async fn evaluate_inner(
        &self,
        mut decision: ComplianceDecision,
        url: &Url,
        host: &str,
        source: &SourceConfig,
    ) -> ComplianceDecision {
        // 1. robots.txt
        let origin = url.origin().ascii_serialization();
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        let mut crawl_delay = None;
        let agent = self.agent_string(source);
        match self.robots.get_as(&origin, &agent).await.as_ref() {
            RobotsStatus::Present(robots) => {
                if !robots.is_allowed(&source.user_agent, &path) {
                    return decision.block(
                        format!("robots.txt disallows {path} for {}", source.user_agent),
                        vec![format!("ask {host} for an allow rule or a data export")],
                    );
                }
                crawl_delay = robots.crawl_delay(&source.user_agent);
                decision.reasons.push("robots.txt permits path".to_string());
            }
            RobotsStatus::Missing => {
                decision.reasons.push("no robots.txt published".to_string());
            }
            RobotsStatus::Unreachable(err) => {
                decision.reasons.push("robots.txt unavailable".to_string());
                decision
                    .warnings
                    .push(format!("robots.txt for {origin} could not be fetched: {err}"));
            }
        }

        // 2. terms of service
        let terms = self.terms.evaluate(host);
        if terms.blocks() {
            let mut alternatives = Vec::new();
            if let Some(api) = terms.api_alternative.as_ref() {
                decision.method = AccessMethod::Api;
                alternatives.push(format!("use the official API: {api}"));
            }
            return decision.block(
                format!("terms of service for {host} prohibit automated collection"),
                alternatives,
            );
        }
        decision.reasons.push(match terms.basis {
            AssessmentBasis::Registry => format!("terms registry entry for {host}"),
            AssessmentBasis::GovernmentHeuristic => "public-sector domain".to_string(),
            AssessmentBasis::Default => "no terms on record".to_string(),
        });
        if let Some(warning) = terms.warning {
            decision.warnings.push(warning);
        }
        if terms.attribution_required {
            decision
                .warnings
                .push(format!("attribution to {host} required"));
        }

        // 3. consent
        if self.settings.require_consent && !is_government_domain(host) {
            match self.consent.status(host, Utc::now()) {
                ConsentStatus::Granted => decision.reasons.push("consent on record".to_string()),
                status => {
                    return decision.block(
                        format!("no valid consent for {host} ({status:?})"),
                        vec![format!(
                            "request consent from {host} via {}",
                            self.settings.contact
                        )],
                    );
                }
            }
        }

        // 4. pass
        let mut rate = source.requests_per_second;
        if let Some(delay) = crawl_delay.filter(|delay| *delay > 0.0) {
            rate = rate.min(1.0 / delay);
        }
        decision.effective_rate_limit = Some(rate);
        decision
            .headers
            .insert("User-Agent".to_string(), agent);
        decision
            .headers
            .insert("From".to_string(), self.settings.contact.clone());
        decision
            .headers
            .insert("X-Crawl-Purpose".to_string(), self.settings.purpose.clone());

        decision.method = AccessMethod::Direct;
        if self.settings.use_egress_pool && !self.egress.is_empty() {
            match self.egress.select() {
                Some(path) => {
                    decision.method = AccessMethod::Proxy;
                    decision.egress = Some(path);
                }
                None => decision.warnings.push(format!(
                    "no egress path meets ethical score {}; going direct",
                    self.egress.min_ethical_score()
                )),
            }
        }
        decision.allowed = true;
        decision
    }
}
