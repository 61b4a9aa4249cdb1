// Tests for scan persistence

use chrono::Utc;
use linkrot_core::data::{Database, SqliteSink};
use linkrot_scanner::error::FailureCause;
use linkrot_scanner::normalize::LinkScope;
use linkrot_scanner::report::{
    Aggregator, CompletionNote, FailureKind, ReportSink, ScanFailure, ScanId, ScanOutcome,
    ScanReport, ScanStatus,
};
use linkrot_scanner::result::{LinkCheckResult, LinkNode, ScannedLink};
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn link(url: &str, parent: Option<&str>, result: LinkCheckResult) -> ScannedLink {
    ScannedLink {
        node: LinkNode {
            url: url.to_string(),
            parent_url: parent.map(str::to_string),
            depth: if parent.is_some() { 1 } else { 0 },
            scope: LinkScope::Internal,
            discovered_at: Utc::now(),
        },
        result,
    }
}

fn running_report(seed: &str) -> ScanReport {
    ScanReport::new(ScanId::new(), seed)
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_exists_and_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    assert!(!Database::exists(&db_path));
    let db = Database::new(&db_path).unwrap();
    assert!(Database::exists(&db_path));

    drop(db);
    Database::drop(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let report = running_report("https://example.com/");

    {
        let db = Database::new(&db_path).unwrap();
        db.create_scan(&report).unwrap();
    }

    let db = Database::new(&db_path).unwrap();
    assert!(db.get_scan(report.id).unwrap().is_some());
}

// ============================================================================
// Scan Tests
// ============================================================================

#[test]
fn test_create_and_get_scan() {
    let (_temp_dir, db) = create_test_db();
    let report = running_report("https://example.com/");

    db.create_scan(&report).unwrap();
    let summary = db.get_scan(report.id).unwrap().unwrap();

    assert_eq!(summary.id, report.id);
    assert_eq!(summary.seed_url, "https://example.com/");
    assert_eq!(summary.status, ScanStatus::Running);
    assert_eq!(summary.completed_at, None);
    assert_eq!(summary.total_links, 0);
}

#[test]
fn test_get_unknown_scan() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.get_scan(ScanId::new()).unwrap().is_none());
    assert!(db.load_report(ScanId::new()).unwrap().is_none());
}

#[test]
fn test_duplicate_scan_id_rejected() {
    let (_temp_dir, db) = create_test_db();
    let report = running_report("https://example.com/");

    db.create_scan(&report).unwrap();
    assert!(db.create_scan(&report).is_err());
}

#[test]
fn test_finish_scan_completed_with_note() {
    let (_temp_dir, db) = create_test_db();
    let mut report = running_report("https://example.com/");
    db.create_scan(&report).unwrap();

    report.status = ScanStatus::Completed;
    report.note = Some(CompletionNote::LinkCapReached);
    report.completed_at = Some(Utc::now());
    report.total_checked = 5;
    report.total_broken = 2;
    db.finish_scan(&report).unwrap();

    let summary = db.get_scan(report.id).unwrap().unwrap();
    assert_eq!(summary.status, ScanStatus::Completed);
    assert_eq!(summary.note, Some(CompletionNote::LinkCapReached));
    assert_eq!(summary.failure, None);
    assert_eq!(summary.total_checked, 5);
    assert_eq!(summary.total_broken, 2);
    assert!(summary.completed_at.is_some());
}

#[test]
fn test_finish_scan_failed() {
    let (_temp_dir, db) = create_test_db();
    let mut report = running_report("not a url");
    db.create_scan(&report).unwrap();

    report.status = ScanStatus::Failed;
    report.failure = Some(ScanFailure {
        kind: FailureKind::InvalidUrl,
        message: "invalid URL: not a url".to_string(),
    });
    report.completed_at = Some(Utc::now());
    db.finish_scan(&report).unwrap();

    let summary = db.get_scan(report.id).unwrap().unwrap();
    assert_eq!(summary.status, ScanStatus::Failed);
    let failure = summary.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::InvalidUrl);
    assert_eq!(failure.message, "invalid URL: not a url");
}

#[test]
fn test_list_scans_newest_first() {
    let (_temp_dir, db) = create_test_db();

    let first = running_report("https://one.example/");
    db.create_scan(&first).unwrap();
    let mut second = running_report("https://two.example/");
    second.started_at = first.started_at + chrono::Duration::seconds(10);
    db.create_scan(&second).unwrap();

    let scans = db.list_scans(10).unwrap();
    assert_eq!(scans.len(), 2);
    assert_eq!(scans[0].id, second.id);
    assert_eq!(scans[1].id, first.id);

    assert_eq!(db.list_scans(1).unwrap().len(), 1);
}

#[test]
fn test_delete_scan_cascades() {
    let (_temp_dir, db) = create_test_db();
    let report = running_report("https://example.com/");
    db.create_scan(&report).unwrap();
    db.insert_link(
        report.id,
        &link(
            "https://example.com/",
            None,
            LinkCheckResult::reachable("https://example.com/".into(), "https://example.com/".into(), 200),
        ),
    )
    .unwrap();

    assert!(db.delete_scan(report.id).unwrap());
    assert!(db.get_links(report.id).unwrap().is_empty());
    assert!(!db.delete_scan(report.id).unwrap());
}

// ============================================================================
// Link Tests
// ============================================================================

#[test]
fn test_insert_and_read_links() {
    let (_temp_dir, db) = create_test_db();
    let report = running_report("https://example.com/");
    db.create_scan(&report).unwrap();

    let ok = link(
        "https://example.com/",
        None,
        LinkCheckResult::reachable(
            "https://example.com/".into(),
            "https://example.com/home".into(),
            200,
        ),
    );
    let missing = link(
        "https://example.com/gone",
        Some("https://example.com/"),
        LinkCheckResult::reachable(
            "https://example.com/gone".into(),
            "https://example.com/gone".into(),
            404,
        ),
    );
    let unreachable = link(
        "https://down.example.net/",
        Some("https://example.com/"),
        LinkCheckResult::with_error("https://down.example.net/".into(), FailureCause::Timeout),
    );

    db.insert_link(report.id, &ok).unwrap();
    db.insert_link(report.id, &missing).unwrap();
    db.insert_link(report.id, &unreachable).unwrap();

    let links = db.get_links(report.id).unwrap();
    assert_eq!(links.len(), 3);
    assert_eq!(links[0].node.url, "https://example.com/");
    assert_eq!(links[0].result.final_url.as_deref(), Some("https://example.com/home"));
    assert_eq!(links[1].result.status_code, Some(404));
    assert_eq!(links[1].result.error, Some(FailureCause::Http4xx));
    assert_eq!(links[1].node.parent_url.as_deref(), Some("https://example.com/"));
    assert_eq!(links[2].result.status_code, None);
    assert_eq!(links[2].result.error, Some(FailureCause::Timeout));

    let broken = db.get_broken_links(report.id).unwrap();
    assert_eq!(broken.len(), 2);
}

#[test]
fn test_timestamps_survive_roundtrip() {
    let (_temp_dir, db) = create_test_db();
    let report = running_report("https://example.com/");
    db.create_scan(&report).unwrap();

    let original = link(
        "https://example.com/",
        None,
        LinkCheckResult::unchecked("https://example.com/".into()),
    );
    db.insert_link(report.id, &original).unwrap();

    let stored = &db.get_links(report.id).unwrap()[0];
    assert_eq!(
        stored.node.discovered_at.timestamp_millis(),
        original.node.discovered_at.timestamp_millis()
    );
    assert!(!stored.result.checked);
    assert!(!stored.result.is_broken);
}

#[test]
fn test_duplicate_link_rejected() {
    let (_temp_dir, db) = create_test_db();
    let report = running_report("https://example.com/");
    db.create_scan(&report).unwrap();

    let l = link(
        "https://example.com/",
        None,
        LinkCheckResult::unchecked("https://example.com/".into()),
    );
    db.insert_link(report.id, &l).unwrap();
    assert!(db.insert_link(report.id, &l).is_err());
}

#[test]
fn test_link_requires_scan() {
    let (_temp_dir, db) = create_test_db();
    let l = link(
        "https://example.com/",
        None,
        LinkCheckResult::unchecked("https://example.com/".into()),
    );
    assert!(db.insert_link(ScanId::new(), &l).is_err());
}

// ============================================================================
// Sink Tests
// ============================================================================

#[test]
fn test_sink_persists_aggregator_lifecycle() {
    let sink = Arc::new(SqliteSink::new(Database::in_memory().unwrap()));
    let id = ScanId::new();
    let aggregator = Aggregator::new(id, "https://example.com/", sink.clone());

    let seed = link(
        "https://example.com/",
        None,
        LinkCheckResult::reachable("https://example.com/".into(), "https://example.com/".into(), 200),
    );
    let gone = link(
        "https://example.com/gone",
        Some("https://example.com/"),
        LinkCheckResult::reachable(
            "https://example.com/gone".into(),
            "https://example.com/gone".into(),
            410,
        ),
    );
    aggregator.record(seed.node, seed.result);
    aggregator.record(gone.node, gone.result);
    aggregator.finalize(ScanOutcome::Completed(None));

    let stored = sink.load_report(id).unwrap().unwrap();
    assert_eq!(stored.status, ScanStatus::Completed);
    assert_eq!(stored.nodes.len(), 2);
    assert_eq!(stored.total_checked, 2);
    assert_eq!(stored.total_broken, 1);
    let stored_urls: Vec<&str> = stored.nodes.iter().map(|n| n.node.url.as_str()).collect();
    assert_eq!(stored_urls, vec!["https://example.com/", "https://example.com/gone"]);
    assert_eq!(stored.nodes[1].result.status_code, Some(410));
}

#[test]
fn test_sink_errors_map_to_storage() {
    let sink = SqliteSink::new(Database::in_memory().unwrap());
    let report = running_report("https://example.com/");

    sink.begin(&report).unwrap();
    let err = sink.begin(&report).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("storage"));
}

#[test]
fn test_sink_failure_does_not_break_aggregation() {
    // The scan row already exists, so the aggregator's own begin fails.
    let sink = Arc::new(SqliteSink::new(Database::in_memory().unwrap()));
    let report = running_report("https://example.com/");
    sink.begin(&report).unwrap();

    let aggregator = Aggregator::new(report.id, "https://example.com/", sink.clone());
    let seed = link(
        "https://example.com/",
        None,
        LinkCheckResult::unchecked("https://example.com/".into()),
    );
    assert!(aggregator.record(seed.node, seed.result));
    assert!(aggregator.finalize(ScanOutcome::Completed(None)));
    assert_eq!(aggregator.len(), 1);
}
