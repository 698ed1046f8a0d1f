use planning_engine::{
    decode_body, estimate_page_count, DecodeError, FieldSelectors, PageHint, PageParser,
    ScrapeError, SelectorProfile,
};
use pretty_assertions::assert_eq;

const RESULTS: &str = r#"
<html><body>
<p class="result-count">Showing 1-3 of 1,234 applications</p>
<table id="results">
  <tr class="application">
    <td class="reference"><a href="/applications/24%2F00001%2FFU">24/00001/FU</a></td>
    <td class="address">  12 Park   Lane,
        Leeds </td>
    <td class="proposal">Loft conversion</td>
    <td class="status">Granted</td>
    <td class="received">04/03/2024</td>
  </tr>
  <tr class="application">
    <td class="reference"></td>
    <td class="address">Unreferenced site</td>
  </tr>
  <tr class="application">
    <td class="reference"><a href="https://other.example.org/x">24/00003/FU</a></td>
    <td class="status">Pending consideration</td>
  </tr>
</table>
<div class="pagination">
  <a href="?page=1">1</a><a href="?page=2">2</a><a href="?page=7">Last</a>
</div>
</body></html>
"#;

#[test]
fn rows_extract_fields_and_resolve_links() {
    let parser = PageParser::new(&SelectorProfile::default()).unwrap();
    let rows = parser
        .rows(RESULTS, "https://planning.leeds.gov.uk/search?page=1")
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].reference.as_deref(), Some("24/00001/FU"));
    assert_eq!(rows[0].address.as_deref(), Some("12 Park Lane, Leeds"));
    assert_eq!(rows[0].status.as_deref(), Some("Granted"));
    assert_eq!(rows[0].received.as_deref(), Some("04/03/2024"));
    assert_eq!(
        rows[0].detail_href.as_deref(),
        Some("https://planning.leeds.gov.uk/applications/24%2F00001%2FFU")
    );
    assert_eq!(rows[1].reference, None);
    assert_eq!(
        rows[2].detail_href.as_deref(),
        Some("https://other.example.org/x")
    );
}

#[test]
fn page_without_container_is_an_error() {
    let parser = PageParser::new(&SelectorProfile::default()).unwrap();
    let err = parser
        .rows("<html><body><h1>Service unavailable</h1></body></html>", "https://x.gov.uk/")
        .unwrap_err();
    assert!(matches!(err, ScrapeError::Parsing(_)));
}

#[test]
fn empty_result_page_has_no_rows() {
    let parser = PageParser::new(&SelectorProfile::default()).unwrap();
    let rows = parser
        .rows(r#"<div id="results"></div>"#, "https://x.gov.uk/")
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn page_hint_reads_pagination_and_totals() {
    let parser = PageParser::new(&SelectorProfile::default()).unwrap();
    let hint = parser.page_hint(RESULTS);
    assert_eq!(
        hint,
        PageHint {
            last_page: Some(7),
            result_total: Some(1234),
            rows_on_page: 3,
        }
    );
}

#[test]
fn result_total_ignores_dates_and_ranges() {
    let parser = PageParser::new(&SelectorProfile::default()).unwrap();
    let page = |count: &str| {
        format!(r#"<p class="result-count">{count}</p><div id="results"></div>"#)
    };

    let hint = parser.page_hint(&page("35 applications received since 01/03/2024"));
    assert_eq!(hint.result_total, Some(35));
    assert_eq!(estimate_page_count(&hint, Some(10), 10), 4);

    let hint = parser.page_hint(&page("Results 1 - 10 of 57 (updated 09:30, 2024-03-01)"));
    assert_eq!(hint.result_total, Some(57));

    let hint = parser.page_hint(&page("1,204 applications found"));
    assert_eq!(hint.result_total, Some(1204));

    let hint = parser.page_hint(&page("Searched on 01/03/2024"));
    assert_eq!(hint.result_total, None);
}

#[test]
fn page_count_estimation() {
    let explicit = PageHint {
        last_page: Some(7),
        result_total: Some(1234),
        rows_on_page: 3,
    };
    assert_eq!(estimate_page_count(&explicit, Some(10), 10), 7);

    let totals_only = PageHint {
        last_page: None,
        result_total: Some(95),
        rows_on_page: 25,
    };
    assert_eq!(estimate_page_count(&totals_only, Some(20), 10), 5);
    // Without a configured size the first page's row count stands in.
    assert_eq!(estimate_page_count(&totals_only, None, 10), 4);

    let nothing = PageHint {
        rows_on_page: 4,
        ..PageHint::default()
    };
    assert_eq!(estimate_page_count(&nothing, Some(20), 10), 10);

    let empty = PageHint {
        result_total: Some(0),
        ..PageHint::default()
    };
    assert_eq!(estimate_page_count(&empty, Some(20), 10), 0);
}

#[test]
fn detail_page_uses_its_own_selectors() {
    let profile = SelectorProfile {
        detail: Some(FieldSelectors {
            reference: "#ref".to_string(),
            address: Some("#site".to_string()),
            proposal: None,
            status: Some("dd.decision".to_string()),
            received: None,
            validated: None,
            decided: Some("dd.decided".to_string()),
        }),
        ..SelectorProfile::default()
    };
    let parser = PageParser::new(&profile).unwrap();

    let raw = parser
        .detail(
            r#"<h1 id="ref">23/04567/OUT</h1><p id="site">Former Mill</p>
               <dl><dd class="decision">Refused</dd><dd class="decided">Tue 12 Mar 2024</dd></dl>"#,
        )
        .unwrap();
    assert_eq!(raw.reference.as_deref(), Some("23/04567/OUT"));
    assert_eq!(raw.address.as_deref(), Some("Former Mill"));
    assert_eq!(raw.status.as_deref(), Some("Refused"));
    assert_eq!(raw.decided.as_deref(), Some("Tue 12 Mar 2024"));

    assert!(parser.detail("<p>No such application</p>").is_none());
}

#[test]
fn invalid_selector_is_rejected_up_front() {
    let profile = SelectorProfile {
        row: "tr[".to_string(),
        ..SelectorProfile::default()
    };
    assert!(matches!(
        PageParser::new(&profile),
        Err(ScrapeError::Parsing(_))
    ));
}

#[test]
fn decoding_honours_declared_charset() {
    let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode("Café extension");
    let body = decode_body(&bytes, Some("text/html; charset=windows-1252")).unwrap();
    assert_eq!(body.text, "Café extension");
    assert!(!body.lossy);

    let utf8 = decode_body("Café".as_bytes(), Some("text/html")).unwrap();
    assert_eq!(utf8.text, "Café");

    assert!(matches!(decode_body(b"", None), Err(DecodeError::Empty)));
}
