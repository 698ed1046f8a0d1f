use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::slug::{record_key, record_slug};
use crate::status::ApplicationStatus;

/// Unnormalized fields scraped from one result row or detail page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow {
    pub reference: Option<String>,
    pub address: Option<String>,
    pub proposal: Option<String>,
    pub status: Option<String>,
    pub received: Option<String>,
    pub validated: Option<String>,
    pub decided: Option<String>,
    pub detail_href: Option<String>,
}

/// A normalized planning application, ready for the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub reference: String,
    pub address: String,
    pub proposal: String,
    pub status: ApplicationStatus,
    pub source_id: String,
    pub received_date: Option<NaiveDate>,
    pub validated_date: Option<NaiveDate>,
    pub decision_date: Option<NaiveDate>,
    pub slug: String,
    pub canonical_url: String,
}

impl Record {
    /// Normalize a raw row. Returns `None` when the row has no usable
    /// reference; such rows cannot be tracked and are dropped.
    ///
    /// Unparseable dates become `None` rather than failing the row.
    pub fn from_row(
        row: &RawRow,
        source_id: &str,
        site_root: &str,
        normalize: impl Fn(&str) -> ApplicationStatus,
    ) -> Option<Record> {
        let reference = clean(row.reference.as_deref())?;
        let address = clean(row.address.as_deref()).unwrap_or_default();
        let proposal = clean(row.proposal.as_deref()).unwrap_or_default();
        let status = row
            .status
            .as_deref()
            .map(&normalize)
            .unwrap_or(ApplicationStatus::Unknown);

        let slug = record_slug(&reference, &address);
        let canonical_url = format!(
            "{}/planning/{}/{}",
            site_root.trim_end_matches('/'),
            source_id,
            slug
        );

        Some(Record {
            key: record_key(source_id, &reference),
            reference,
            address,
            proposal,
            status,
            source_id: source_id.to_string(),
            received_date: row.received.as_deref().and_then(parse_date),
            validated_date: row.validated.as_deref().and_then(parse_date),
            decision_date: row.decided.as_deref().and_then(parse_date),
            slug,
            canonical_url,
        })
    }
}

const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y",
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%a %d %b %Y",
    "%A %d %B %Y",
];

/// Parse the date shapes council portals commonly print.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

fn clean(value: Option<&str>) -> Option<String> {
    let collapsed = value?.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
