use std::time::Duration;

use chrono::NaiveDate;
use planning_core::{throughput, ConfigIssue, RunStats, RunStatus, SourceConfig};

#[test]
fn templates_render_placeholders() {
    let mut config = SourceConfig::new("east", "https://portal.example.gov.uk/");
    config.search_url = "{base}/search?from={from_date}&p={page}".to_string();
    let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();

    assert_eq!(
        config.search_url_for(date, 3),
        "https://portal.example.gov.uk/search?from=2024-01-31&p=3"
    );
    assert_eq!(
        config.detail_url_for("24/001 FUL"),
        "https://portal.example.gov.uk/applications/24%2F001+FUL"
    );
}

#[test]
fn validation_rejects_bad_values() {
    let ok = SourceConfig::new("east", "https://portal.example.gov.uk");
    assert_eq!(ok.validate(), Ok(()));

    let mut bad = ok.clone();
    bad.requests_per_second = 0.0;
    assert!(matches!(bad.validate(), Err(ConfigIssue::NonPositiveRate { .. })));

    let mut bad = ok.clone();
    bad.page_concurrency = 0;
    assert!(matches!(bad.validate(), Err(ConfigIssue::ZeroConcurrency { .. })));

    let mut bad = ok.clone();
    bad.max_pages = 0;
    assert_eq!(
        bad.validate(),
        Err(ConfigIssue::ZeroConcurrency {
            id: "east".to_string(),
            field: "max_pages",
        })
    );

    let mut bad = ok.clone();
    bad.base_url = "not a url".to_string();
    assert!(matches!(bad.validate(), Err(ConfigIssue::InvalidBaseUrl { .. })));

    let mut bad = ok;
    bad.search_url = "{base}/all".to_string();
    assert!(matches!(
        bad.validate(),
        Err(ConfigIssue::MissingPagePlaceholder { .. })
    ));
}

#[test]
fn stats_merge_and_count_errors() {
    let mut a = RunStats::new();
    a.record_page(true);
    a.record_page(false);
    a.record_items(4, 1);

    let mut total = RunStats::new();
    total.merge(&a);
    total.merge(&a);
    assert_eq!(total.pages_processed, 2);
    assert_eq!(total.pages_failed, 2);
    assert_eq!(total.items_processed, 10);
    assert_eq!(total.error_count(), 4);
}

#[test]
fn blocked_pages_are_not_errors() {
    let mut stats = RunStats::new();
    stats.record_page(true);
    stats.record_blocked_page();
    stats.record_blocked_page();

    let mut total = RunStats::new();
    total.merge(&stats);
    assert_eq!(total.pages_blocked, 2);
    assert_eq!(total.pages_failed, 0);
    assert_eq!(total.error_count(), 0);
}

#[test]
fn status_classification() {
    assert_eq!(RunStatus::classify(3, 0, false), RunStatus::Success);
    assert_eq!(RunStatus::classify(3, 1, false), RunStatus::Partial);
    assert_eq!(RunStatus::classify(0, 2, false), RunStatus::Failed);
    assert_eq!(RunStatus::classify(3, 0, true), RunStatus::Cancelled);
    assert_eq!(RunStatus::Partial.exit_code(), 2);
}

#[test]
fn throughput_handles_zero_elapsed() {
    assert_eq!(throughput(10, Duration::ZERO), 0.0);
    assert!((throughput(10, Duration::from_secs(2)) - 5.0).abs() < f64::EPSILON);
}
