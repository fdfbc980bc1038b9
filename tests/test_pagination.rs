use chrono::NaiveDate;
use rs_faas_ng::configs::{BudgetConfig, FaasConfig};
use rs_faas_ng::NgError;
use rs_faas_ng::faas::pagination::{PageDecision, PaginationDriver, PaginationReport, StopReason, next_page};
use rs_faas_ng::faas::poller::{AdaptivePoller, Payload};
use rs_faas_ng::faas::sink::{ArtifactKind, FileSink, NoDataMarker, PageArtifact, ResultSink};
use rs_faas_ng::faas::{ReportKind, RunStatus, RunSummary, Ticket, TokenManager};
use rs_faas_ng::loggers::{Logger, LoggerBuilder};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn get_test_logger() -> Logger {
    LoggerBuilder::new("test-pagination").build().unwrap()
}

fn artifact(page: u32, kind: ArtifactKind, declared: Option<(u32, u32)>, records: Option<usize>) -> PageArtifact {
    PageArtifact {
        ticket: "T".into(),
        page,
        kind,
        path: PathBuf::from("T.json"),
        size_bytes: 10,
        record_count: records,
        declared_page: declared.map(|d| d.0),
        total_pages: declared.map(|d| d.1),
        extracted: Vec::new(),
    }
}

// =========================================================================
// STOP RULES
// =========================================================================

#[test]
fn marker_stops_before_anything_else() {
    let a = artifact(1, ArtifactKind::NoData, Some((1, 0)), Some(0));
    assert_eq!(next_page(&a, 5), PageDecision::Stop(StopReason::AbsenceMarker));
}

#[test]
fn last_declared_page_stops() {
    let a = artifact(2, ArtifactKind::Data, Some((2, 2)), Some(3));
    assert_eq!(
        next_page(&a, 5),
        PageDecision::Stop(StopReason::LastDeclaredPage { page: 2, total_pages: 2 })
    );

    let more = artifact(1, ArtifactKind::Data, Some((1, 3)), Some(3));
    assert_eq!(next_page(&more, 5), PageDecision::Continue(2));
}

#[test]
fn only_an_empty_first_page_stops() {
    let first = artifact(1, ArtifactKind::Data, None, Some(0));
    assert_eq!(next_page(&first, 5), PageDecision::Stop(StopReason::EmptyFirstPage));

    let second = artifact(2, ArtifactKind::Data, None, Some(0));
    assert_eq!(next_page(&second, 5), PageDecision::Continue(3));
}

#[test]
fn page_ceiling_is_never_exceeded() {
    let a = artifact(2, ArtifactKind::Data, Some((2, 9)), Some(4));
    assert_eq!(next_page(&a, 2), PageDecision::Stop(StopReason::PageCeiling(2)));
    assert_eq!(next_page(&a, 3), PageDecision::Continue(3));

    let undeclared = artifact(1, ArtifactKind::Data, None, Some(4));
    assert_eq!(next_page(&undeclared, 1), PageDecision::Stop(StopReason::PageCeiling(1)));
}

#[test]
fn archive_is_a_single_payload() {
    let a = artifact(1, ArtifactKind::Archive, None, None);
    assert_eq!(next_page(&a, 5), PageDecision::Stop(StopReason::SinglePayload));
}

// =========================================================================
// DRIVER
// =========================================================================

fn driver_config(server: &MockServer) -> FaasConfig {
    let mut cfg = FaasConfig::default();
    cfg.auth.url = Some(format!("{}/token", server.uri()));
    cfg.auth.client_id = Some("id".into());
    cfg.auth.client_secret = Some("secret".into());
    cfg.auth.scopes.profitability = Some("patrimonio".into());
    cfg.endpoints.poll_url = Some(format!("{}/poll", server.uri()));
    cfg.polling.aging = BudgetConfig { max_attempts: 2, wait_ms: 10, ceiling_ms: 5_000 };
    cfg.polling.stale = BudgetConfig { max_attempts: 4, wait_ms: 10, ceiling_ms: 5_000 };
    cfg
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok" })))
        .mount(server)
        .await;
}

fn page(n: u32) -> wiremock::MockBuilder {
    Mock::given(method("GET"))
        .and(path("/poll"))
        .and(query_param("pageNumber", n.to_string()))
}

async fn drive_with(server: &MockServer, sink: &dyn ResultSink, ceiling: u32, age_days: i64) -> PaginationReport {
    let cfg = driver_config(server);
    let logger = get_test_logger();
    let tokens = TokenManager::new(&cfg, ReportKind::Profitability, logger.clone()).unwrap();
    let poller = AdaptivePoller::new(&cfg, ReportKind::Profitability, logger.clone()).unwrap();
    let driver = PaginationDriver::new(&poller, &tokens, sink, ceiling, logger);

    driver
        .run(&Ticket::new("P1"), NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(), age_days)
        .await
}

async fn drive(server: &MockServer, dir: &std::path::Path, ceiling: u32) -> PaginationReport {
    let sink = FileSink::new(dir, get_test_logger());
    drive_with(server, &sink, ceiling, 10).await
}

/// Writes through a `FileSink` but cannot persist pages past the first.
struct FullDiskSink(FileSink);

impl ResultSink for FullDiskSink {
    fn prepare(&self) -> Result<(), NgError> {
        self.0.prepare()
    }

    fn write_page(&self, ticket: &Ticket, page: u32, payload: &Payload) -> Result<PageArtifact, NgError> {
        if page > 1 {
            return Err(NgError::IoError("No space left on device".into()));
        }
        self.0.write_page(ticket, page, payload)
    }

    fn write_absence(&self, ticket: &Ticket, page: u32, marker: &NoDataMarker) -> Result<PageArtifact, NgError> {
        self.0.write_absence(ticket, page, marker)
    }

    fn location(&self) -> &Path {
        self.0.location()
    }
}

#[tokio::test]
async fn follows_declared_pages() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    for n in 1..=3u32 {
        page(n)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [{ "n": n }], "page": n, "totalPages": 3 })))
            .expect(1)
            .mount(&server)
            .await;
    }
    let dir = tempfile::tempdir().unwrap();

    let report = drive(&server, dir.path(), 5).await;

    assert!(report.error.is_none());
    assert_eq!(report.stop, StopReason::LastDeclaredPage { page: 3, total_pages: 3 });
    assert_eq!(report.total_files(), 3);
    assert!(dir.path().join("P1_p3.json").exists());
}

#[tokio::test]
async fn stops_at_the_kind_ceiling() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    for n in 1..=2u32 {
        page(n)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [{ "n": n }], "page": n, "totalPages": 10 })))
            .expect(1)
            .mount(&server)
            .await;
    }
    page(3).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let report = drive(&server, dir.path(), 2).await;

    assert_eq!(report.stop, StopReason::PageCeiling(2));
    assert_eq!(report.artifacts.len(), 2);
}

#[tokio::test]
async fn later_page_failure_ends_the_report_quietly() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    page(1)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [{ "n": 1 }], "page": 1, "totalPages": 2 })))
        .mount(&server)
        .await;
    page(2).respond_with(ResponseTemplate::new(503)).mount(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let report = drive(&server, dir.path(), 5).await;

    assert!(report.error.is_none());
    assert_eq!(report.stop, StopReason::PageFailed { page: 2 });
    assert_eq!(report.artifacts.len(), 1);
}

#[tokio::test]
async fn first_page_failure_aborts() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    page(1)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "Erro interno" })))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let report = drive(&server, dir.path(), 5).await;

    assert_eq!(report.stop, StopReason::Aborted);
    assert!(report.artifacts.is_empty());
    let err = report.error.expect("abort carries the error");
    assert!(err.to_string().contains("Erro interno"));
}

#[tokio::test]
async fn empty_first_page_is_written_and_stops() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    page(1)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [] })))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let report = drive(&server, dir.path(), 5).await;

    assert_eq!(report.stop, StopReason::EmptyFirstPage);
    assert_eq!(report.total_files(), 1);
    assert!(report.total_bytes() > 0);
}

#[tokio::test]
async fn absence_on_a_later_page_writes_a_page_one_marker() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    page(1)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [{ "n": 1 }], "page": 1, "totalPages": 3 })))
        .mount(&server)
        .await;
    page(2)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "Processando" })))
        .expect(3)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(dir.path(), get_test_logger());

    let report = drive_with(&server, &sink, 5, 45).await;

    assert_eq!(report.stop, StopReason::AbsenceMarker);
    assert_eq!(report.total_files(), 2);
    let marker: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("P1_p2_no_data.json")).unwrap()).unwrap();
    assert_eq!(marker["page"], json!(1));
    assert_eq!(marker["totalPages"], json!(0));
}

#[tokio::test]
async fn failing_to_persist_a_later_page_fails_the_run() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    for n in 1..=2u32 {
        page(n)
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [{ "n": n }], "page": n, "totalPages": 2 })))
            .mount(&server)
            .await;
    }
    let dir = tempfile::tempdir().unwrap();
    let sink = FullDiskSink(FileSink::new(dir.path(), get_test_logger()));

    let report = drive_with(&server, &sink, 5, 10).await;

    assert_eq!(report.stop, StopReason::Aborted);
    assert_eq!(report.artifacts.len(), 1);
    let errors: Vec<String> = report.error.iter().map(|e| e.to_string()).collect();
    assert!(errors[0].contains("No space left"));

    let summary = RunSummary::new(
        report.total_files(),
        report.total_bytes(),
        Duration::from_millis(5),
        errors,
        "2024-05-02",
        "out",
        Some("P1".into()),
    );
    assert_eq!(summary.status, RunStatus::Failure);
    assert_eq!(summary.total_arquivos, 1);
}
