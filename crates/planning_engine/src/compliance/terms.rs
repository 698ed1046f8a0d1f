use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapingStance {
    Permitted,
    Prohibited,
    Unknown,
}

/// Known terms-of-service position for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsEntry {
    pub domain: String,
    pub stance: ScrapingStance,
    #[serde(default)]
    pub attribution_required: bool,
    #[serde(default)]
    pub api_alternative: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentBasis {
    Registry,
    GovernmentHeuristic,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermsAssessment {
    pub stance: ScrapingStance,
    pub basis: AssessmentBasis,
    pub attribution_required: bool,
    pub api_alternative: Option<String>,
    pub warning: Option<String>,
}

impl TermsAssessment {
    pub fn blocks(&self) -> bool {
        self.stance == ScrapingStance::Prohibited
    }
}

#[derive(Debug, Clone, Default)]
pub struct TermsRegistry {
    entries: HashMap<String, TermsEntry>,
}

impl TermsRegistry {
    pub fn new(entries: impl IntoIterator<Item = TermsEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (normalize_host(&entry.domain), entry))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evaluate(&self, host: &str) -> TermsAssessment {
        let host = normalize_host(host);
        if let Some(entry) = self.entries.get(&host) {
            let warning = match entry.stance {
                ScrapingStance::Unknown => Some(format!(
                    "terms of service for {host} not reviewed; manual review recommended"
                )),
                _ => None,
            };
            return TermsAssessment {
                stance: entry.stance,
                basis: AssessmentBasis::Registry,
                attribution_required: entry.attribution_required,
                api_alternative: entry.api_alternative.clone(),
                warning,
            };
        }

        if is_government_domain(&host) {
            return TermsAssessment {
                stance: ScrapingStance::Permitted,
                basis: AssessmentBasis::GovernmentHeuristic,
                attribution_required: true,
                api_alternative: None,
                warning: None,
            };
        }

        TermsAssessment {
            stance: ScrapingStance::Unknown,
            basis: AssessmentBasis::Default,
            attribution_required: false,
            api_alternative: None,
            warning: Some(format!(
                "no terms of service on record for {host}; manual review recommended"
            )),
        }
    }
}

const GOVERNMENT_SUFFIXES: &[&str] = &[
    ".gov.uk",
    ".gov",
    ".gov.scot",
    ".gov.wales",
    ".llyw.cymru",
    ".gov.au",
    ".govt.nz",
    ".gc.ca",
    ".nhs.uk",
];

/// Public-sector hosts: government suffixes, or any label naming a council.
pub fn is_government_domain(host: &str) -> bool {
    let host = normalize_host(host);
    GOVERNMENT_SUFFIXES
        .iter()
        .any(|suffix| host.ends_with(suffix) || host == suffix[1..])
        || host.split('.').any(|label| label.contains("council"))
}

pub(crate) fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}
