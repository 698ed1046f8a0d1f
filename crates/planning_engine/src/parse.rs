//! Selector-driven extraction of result rows, detail pages and pagination hints.

use planning_core::RawRow;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::ScrapeError;

/// CSS selectors for the fields of one application, relative to a row (or
/// to the whole document on detail pages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelectors {
    pub reference: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub proposal: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub received: Option<String>,
    #[serde(default)]
    pub validated: Option<String>,
    #[serde(default)]
    pub decided: Option<String>,
}

impl Default for FieldSelectors {
    fn default() -> Self {
        Self {
            reference: ".reference".to_string(),
            address: Some(".address".to_string()),
            proposal: Some(".proposal".to_string()),
            status: Some(".status".to_string()),
            received: Some(".received".to_string()),
            validated: Some(".validated".to_string()),
            decided: Some(".decided".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorProfile {
    /// Must be present on every genuine result page, even an empty one.
    #[serde(default)]
    pub container: Option<String>,
    pub row: String,
    #[serde(default)]
    pub fields: FieldSelectors,
    #[serde(default)]
    pub detail_link: Option<String>,
    #[serde(default)]
    pub pagination: Option<String>,
    #[serde(default)]
    pub result_count: Option<String>,
    /// Detail-page selectors; defaults to `fields` applied to the document.
    #[serde(default)]
    pub detail: Option<FieldSelectors>,
}

impl Default for SelectorProfile {
    fn default() -> Self {
        Self {
            container: Some("#results".to_string()),
            row: ".application".to_string(),
            fields: FieldSelectors::default(),
            detail_link: Some("a".to_string()),
            pagination: Some(".pagination a".to_string()),
            result_count: Some(".result-count".to_string()),
            detail: None,
        }
    }
}

#[derive(Debug)]
struct CompiledFields {
    reference: Selector,
    address: Option<Selector>,
    proposal: Option<Selector>,
    status: Option<Selector>,
    received: Option<Selector>,
    validated: Option<Selector>,
    decided: Option<Selector>,
}

impl CompiledFields {
    fn compile(fields: &FieldSelectors) -> Result<Self, ScrapeError> {
        Ok(Self {
            reference: compile(&fields.reference)?,
            address: compile_opt(fields.address.as_deref())?,
            proposal: compile_opt(fields.proposal.as_deref())?,
            status: compile_opt(fields.status.as_deref())?,
            received: compile_opt(fields.received.as_deref())?,
            validated: compile_opt(fields.validated.as_deref())?,
            decided: compile_opt(fields.decided.as_deref())?,
        })
    }

    fn extract(&self, scope: ElementRef<'_>) -> RawRow {
        RawRow {
            reference: first_text(scope, Some(&self.reference)),
            address: first_text(scope, self.address.as_ref()),
            proposal: first_text(scope, self.proposal.as_ref()),
            status: first_text(scope, self.status.as_ref()),
            received: first_text(scope, self.received.as_ref()),
            validated: first_text(scope, self.validated.as_ref()),
            decided: first_text(scope, self.decided.as_ref()),
            detail_href: None,
        }
    }
}

/// What the first result page says about how many pages exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageHint {
    pub last_page: Option<u32>,
    pub result_total: Option<u32>,
    pub rows_on_page: usize,
}

/// Resolve a [`PageHint`] to a page count: explicit pagination, else
/// `ceil(total / page_size)`, else `fallback`. An explicit empty result set
/// yields zero pages.
pub fn estimate_page_count(hint: &PageHint, page_size: Option<u32>, fallback: u32) -> u32 {
    if let Some(last) = hint.last_page {
        return last.max(1);
    }
    if let Some(total) = hint.result_total {
        if total == 0 && hint.rows_on_page == 0 {
            return 0;
        }
        let size = page_size
            .filter(|size| *size > 0)
            .or_else(|| u32::try_from(hint.rows_on_page).ok().filter(|rows| *rows > 0));
        if let Some(size) = size {
            return total.div_ceil(size);
        }
    }
    fallback
}

/// Selectors compiled once per source.
#[derive(Debug)]
pub struct PageParser {
    container: Option<Selector>,
    row: Selector,
    fields: CompiledFields,
    detail_fields: Option<CompiledFields>,
    detail_link: Option<Selector>,
    pagination: Option<Selector>,
    result_count: Option<Selector>,
}

impl PageParser {
    pub fn new(profile: &SelectorProfile) -> Result<Self, ScrapeError> {
        Ok(Self {
            container: compile_opt(profile.container.as_deref())?,
            row: compile(&profile.row)?,
            fields: CompiledFields::compile(&profile.fields)?,
            detail_fields: profile
                .detail
                .as_ref()
                .map(CompiledFields::compile)
                .transpose()?,
            detail_link: compile_opt(profile.detail_link.as_deref())?,
            pagination: compile_opt(profile.pagination.as_deref())?,
            result_count: compile_opt(profile.result_count.as_deref())?,
        })
    }

    /// All rows of a result page. A page without the configured container is
    /// not a result page and fails as a whole; individual odd rows do not.
    pub fn rows(&self, html: &str, base_url: &str) -> Result<Vec<RawRow>, ScrapeError> {
        let doc = Html::parse_document(html);
        if let Some(container) = self.container.as_ref() {
            if doc.select(container).next().is_none() {
                return Err(ScrapeError::Parsing(
                    "result container missing from page".to_string(),
                ));
            }
        }
        let base = Url::parse(base_url).ok();
        let rows = doc
            .select(&self.row)
            .map(|row| {
                let mut raw = self.fields.extract(row);
                raw.detail_href = self
                    .detail_link
                    .as_ref()
                    .and_then(|sel| row.select(sel).next())
                    .and_then(|link| link.value().attr("href"))
                    .map(|href| resolve(base.as_ref(), href));
                raw
            })
            .collect();
        Ok(rows)
    }

    /// Fields of a detail page; `None` when not even a reference is found.
    pub fn detail(&self, html: &str) -> Option<RawRow> {
        let doc = Html::parse_document(html);
        let fields = self.detail_fields.as_ref().unwrap_or(&self.fields);
        let raw = fields.extract(doc.root_element());
        raw.reference.as_ref()?;
        Some(raw)
    }

    pub fn page_hint(&self, html: &str) -> PageHint {
        let doc = Html::parse_document(html);
        let last_page = self.pagination.as_ref().and_then(|sel| {
            doc.select(sel)
                .filter_map(|link| {
                    let text = collapse(&link.text().collect::<String>());
                    text.parse::<u32>().ok().or_else(|| {
                        link.value().attr("href").and_then(page_param)
                    })
                })
                .max()
        });
        let result_total = self.result_count.as_ref().and_then(|sel| {
            doc.select(sel)
                .next()
                .and_then(|node| result_total(&node.text().collect::<String>()))
        });
        PageHint {
            last_page,
            result_total,
            rows_on_page: doc.select(&self.row).count(),
        }
    }
}

fn compile(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector)
        .map_err(|err| ScrapeError::Parsing(format!("invalid selector '{selector}': {err}")))
}

fn compile_opt(selector: Option<&str>) -> Result<Option<Selector>, ScrapeError> {
    selector.map(compile).transpose()
}

fn first_text(scope: ElementRef<'_>, selector: Option<&Selector>) -> Option<String> {
    let node = scope.select(selector?).next()?;
    let text = collapse(&node.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve(base: Option<&Url>, href: &str) -> String {
    base.and_then(|base| base.join(href).ok())
        .map(|url| url.to_string())
        .unwrap_or_else(|| href.to_string())
}

/// `?page=7` style links.
fn page_param(href: &str) -> Option<u32> {
    let query = href.split_once('?')?.1;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key.eq_ignore_ascii_case("page") || key.eq_ignore_ascii_case("p"))
        .and_then(|(_, value)| value.parse().ok())
}

/// "Showing 1-10 of 1,234 results" -> 1234,
/// "35 applications received since 01/03/2024" -> 35.
///
/// The number after "of" wins, else the first standalone number. Dates,
/// times and ranges are never standalone.
fn result_total(text: &str) -> Option<u32> {
    let mut first = None;
    let mut after_of = false;
    for token in text.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        let number = standalone_number(token);
        if after_of && number.is_some() {
            return number;
        }
        after_of = token.eq_ignore_ascii_case("of");
        first = first.or(number);
    }
    first
}

fn standalone_number(token: &str) -> Option<u32> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit() || c == ',') {
        return None;
    }
    token.replace(',', "").parse().ok()
}
