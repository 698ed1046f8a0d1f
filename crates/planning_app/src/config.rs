//! RON configuration file plus `PLANNING_*` environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use planning_core::ConfigIssue;
use planning_engine::compliance::{ConsentRecord, ConsentStore, EgressPath, TermsEntry, TermsRegistry};
use planning_engine::{
    ComplianceSettings, EngineContext, FetchSettings, JsonLinesSink, LoggingInvalidator,
    ReqwestFetcher, SourceEntry,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/sources.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
    #[error(transparent)]
    Source(#[from] ConfigIssue),
    #[error("no sources configured")]
    NoSources,
    #[error("a contact address is required (set compliance.contact or PLANNING_CONTACT)")]
    MissingContact,
    #[error("unknown log level '{0}'")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_redirect_limit")]
    pub redirect_limit: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            redirect_limit: default_redirect_limit(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl FetchConfig {
    fn settings(&self) -> FetchSettings {
        FetchSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            redirect_limit: self.redirect_limit,
            max_bytes: self.max_bytes,
            ..FetchSettings::default()
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_redirect_limit() -> usize {
    5
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Root for canonical record URLs.
    #[serde(default = "default_site_root")]
    pub site_root: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Replaces every source's own agent token when set.
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub compliance: ComplianceSettings,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub terms: Vec<TermsEntry>,
    #[serde(default)]
    pub consent: Vec<ConsentRecord>,
    #[serde(default)]
    pub egress: Vec<EgressPath>,
    pub sources: Vec<SourceEntry>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_site_root() -> String {
    "https://planning.example.org".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Read, apply process environment overrides, and validate. Runs before
    /// the logger exists, so it reports only through its error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text, path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        ron::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `PLANNING_USER_AGENT`, `PLANNING_CONTACT`, `PLANNING_OUTPUT_DIR`
    /// and `PLANNING_LOG` from `lookup`. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(agent) = get("PLANNING_USER_AGENT") {
            self.user_agent = Some(agent);
        }
        if let Some(contact) = get("PLANNING_CONTACT") {
            self.compliance.contact = contact;
        }
        if let Some(dir) = get("PLANNING_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(level) = get("PLANNING_LOG") {
            self.log_level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if self.compliance.contact.trim().is_empty() {
            return Err(ConfigError::MissingContact);
        }
        self.level_filter()?;
        for entry in &self.sources {
            entry.config.validate()?;
        }
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }

    /// Source entries with the global agent override applied.
    pub fn source_entries(&self) -> Vec<SourceEntry> {
        self.sources
            .iter()
            .cloned()
            .map(|mut entry| {
                if let Some(agent) = self.user_agent.as_ref() {
                    entry.config.user_agent = agent.clone();
                }
                entry
            })
            .collect()
    }

    pub fn context(&self) -> EngineContext {
        EngineContext::new(
            Arc::new(ReqwestFetcher::new(self.fetch.settings())),
            self.compliance.clone(),
            TermsRegistry::new(self.terms.clone()),
            Arc::new(ConsentStore::new(self.consent.clone())),
            self.egress.clone(),
            Arc::new(JsonLinesSink::new(self.output_dir.clone())),
            Arc::new(LoggingInvalidator),
            self.site_root.clone(),
        )
    }
}
