use chrono::{Duration, NaiveDate};
use rs_faas_ng::configs::{BudgetConfig, FaasConfig};
use rs_faas_ng::faas::calendar;
use rs_faas_ng::faas::{Pipeline, ReportKind, RunStatus};
use rs_faas_ng::loggers::{Logger, LoggerBuilder};
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn get_test_logger() -> Logger {
    LoggerBuilder::new("test-pipeline").build().unwrap()
}

fn pipeline_config(server: &MockServer) -> FaasConfig {
    let mut cfg = FaasConfig::default();
    cfg.auth.url = Some(format!("{}/token", server.uri()));
    cfg.auth.client_id = Some("id".into());
    cfg.auth.client_secret = Some("secret".into());
    cfg.auth.scopes.profitability = Some("patrimonio".into());
    cfg.auth.scopes.portfolio = Some("carteira".into());
    cfg.auth.backoff_base_ms = 5;
    cfg.endpoints.poll_url = Some(format!("{}/poll", server.uri()));
    cfg.endpoints.profitability_url = Some(format!("{}/profitability", server.uri()));
    cfg.endpoints.portfolio_url = Some(format!("{}/portfolio", server.uri()));
    cfg.ticket.backoff_base_ms = 5;
    cfg.polling.initial_delay_ms = 0;
    cfg.polling.auth_retry_delay_ms = 5;
    cfg.polling.stale = BudgetConfig { max_attempts: 4, wait_ms: 10, ceiling_ms: 5_000 };
    cfg.polling.aging = BudgetConfig { max_attempts: 3, wait_ms: 10, ceiling_ms: 5_000 };
    cfg.polling.fresh = BudgetConfig { max_attempts: 3, wait_ms: 10, ceiling_ms: 5_000 };
    cfg
}

fn days_ago(cfg: &FaasConfig, n: i64) -> NaiveDate {
    calendar::today(&cfg.calendar) - Duration::days(n)
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok" })))
        .mount(server)
        .await;
}

async fn mount_ticket(server: &MockServer, id: &str) {
    Mock::given(method("POST"))
        .and(path("/profitability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ticket": id })))
        .expect(1)
        .mount(server)
        .await;
}

fn pipeline(cfg: FaasConfig, base: &std::path::Path) -> Pipeline {
    Pipeline::new(Arc::new(cfg), ReportKind::Profitability, get_test_logger()).with_output_base(base)
}

#[tokio::test]
async fn single_page_report_succeeds() {
    let server = MockServer::start().await;
    let cfg = pipeline_config(&server);
    let date = calendar::previous_business_day(calendar::today(&cfg.calendar), 1);
    mount_token(&server).await;
    mount_ticket(&server, "T1").await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .and(query_param("ticketId", "T1"))
        .and(query_param("pageNumber", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{ "fundo": "XPTO", "rentabilidade": 0.0123 }],
            "page": 1,
            "totalPages": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    let base = tempfile::tempdir().unwrap();

    let summary = pipeline(cfg, base.path()).run(date).await;

    assert_eq!(summary.status, RunStatus::Success, "{:?}", summary.erros);
    assert_eq!(summary.total_arquivos, 1);
    assert!(summary.tamanho_total > 0);
    assert!(summary.erros.is_empty());
    assert_eq!(summary.ticket.as_deref(), Some("T1"));
    assert_eq!(summary.data_referencia, date.format("%Y-%m-%d").to_string());

    let out = base.path().join("raw_rent").join(date.format("%Y-%m-%d").to_string());
    assert_eq!(summary.output_path, out.display().to_string());
    assert!(out.join("T1_p1.json").exists());
}

#[tokio::test]
async fn old_date_that_never_finishes_is_confirmed_absent() {
    let server = MockServer::start().await;
    let cfg = pipeline_config(&server);
    let date = days_ago(&cfg, 45);
    mount_token(&server).await;
    mount_ticket(&server, "T2").await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "Processando" })))
        .expect(3)
        .mount(&server)
        .await;
    let base = tempfile::tempdir().unwrap();

    let summary = pipeline(cfg, base.path()).run(date).await;

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.total_arquivos, 1);

    let marker_path = base
        .path()
        .join("raw_rent")
        .join(date.format("%Y-%m-%d").to_string())
        .join("T2_p1_no_data.json");
    let marker: Value = serde_json::from_str(&std::fs::read_to_string(marker_path).unwrap()).unwrap();
    assert_eq!(marker["result"], json!([]));
    assert_eq!(marker["totalPages"], json!(0));
    assert_eq!(marker["attempts"], json!(3));
    assert!(marker["detection_reason"].as_str().unwrap().contains("45 days old"));
}

#[tokio::test]
async fn ticket_failure_is_reported_as_failure() {
    let server = MockServer::start().await;
    let cfg = pipeline_config(&server);
    let date = calendar::previous_business_day(calendar::today(&cfg.calendar), 1);
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/profitability"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let base = tempfile::tempdir().unwrap();

    let summary = pipeline(cfg, base.path()).run(date).await;

    assert_eq!(summary.status, RunStatus::Failure);
    assert_eq!(summary.total_arquivos, 0);
    assert_eq!(summary.erros.len(), 1);
    assert!(summary.erros[0].contains("HTTP 500"), "{}", summary.erros[0]);
    assert!(summary.ticket.is_none());
    assert_eq!(summary.status.exit_code(), 1);
}

#[tokio::test]
async fn future_date_fails_without_network_calls() {
    let server = MockServer::start().await;
    let cfg = pipeline_config(&server);
    let date = days_ago(&cfg, -3);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let base = tempfile::tempdir().unwrap();

    let summary = pipeline(cfg, base.path()).run(date).await;

    assert_eq!(summary.status, RunStatus::Failure);
    assert!(summary.erros[0].contains("future"));
}

#[tokio::test]
async fn missing_configuration_fails_fast() {
    let server = MockServer::start().await;
    let mut cfg = pipeline_config(&server);
    cfg.auth.client_secret = None;
    let date = days_ago(&cfg, 10);
    let base = tempfile::tempdir().unwrap();

    let summary = pipeline(cfg, base.path()).run(date).await;

    assert_eq!(summary.status, RunStatus::Failure);
    assert!(summary.erros[0].contains("auth.client_secret"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn summary_line_has_the_orchestrator_fields() {
    let server = MockServer::start().await;
    let cfg = pipeline_config(&server);
    let date = days_ago(&cfg, -1);
    let base = tempfile::tempdir().unwrap();

    let summary = pipeline(cfg, base.path()).run(date).await;
    let line = summary.to_json_line();

    assert!(!line.contains('\n'));
    let parsed: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed["status"], json!("FALHA"));
    assert_eq!(parsed["total_arquivos"], json!(0));
    assert_eq!(parsed["tamanho_total"], json!(0));
    assert!(parsed["duracao_segundos"].is_number());
    assert!(parsed["erros"].is_array());
    assert_eq!(parsed["data_referencia"], json!(date.format("%Y-%m-%d").to_string()));
    assert!(parsed["output_path"].is_string());
    assert!(parsed.get("ticket").is_none());
}

#[test]
fn status_classification_and_exit_codes() {
    assert_eq!(RunStatus::classify(2, &[]), RunStatus::Success);
    assert_eq!(RunStatus::classify(1, &["page 2 could not be written".to_string()]), RunStatus::Failure);
    assert_eq!(RunStatus::classify(0, &[]), RunStatus::NoData);
    assert_eq!(RunStatus::classify(0, &["boom".to_string()]), RunStatus::Failure);

    assert_eq!(RunStatus::Success.exit_code(), 0);
    assert_eq!(RunStatus::NoData.exit_code(), 0);
    assert_eq!(RunStatus::Failure.exit_code(), 1);
    assert_eq!(serde_json::to_value(RunStatus::NoData).unwrap(), json!("SEM_DADOS"));
}

fn zip_bytes(members: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[tokio::test]
async fn json_dir_overrides_where_pages_land() {
    let server = MockServer::start().await;
    let cfg = pipeline_config(&server);
    let date = calendar::previous_business_day(calendar::today(&cfg.calendar), 1);
    mount_token(&server).await;
    mount_ticket(&server, "T5").await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [{ "n": 1 }], "page": 1, "totalPages": 1 })))
        .mount(&server)
        .await;
    let base = tempfile::tempdir().unwrap();
    let json_dir = base.path().join("custom").join("rent");

    let summary = pipeline(cfg, base.path()).with_output_dir(&json_dir).run(date).await;

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.output_path, json_dir.display().to_string());
    assert!(json_dir.join("T5_p1.json").exists());
    assert!(!base.path().join("raw_rent").exists());
}

#[tokio::test]
async fn portfolio_spreadsheets_land_in_the_extracted_date_dir() {
    let server = MockServer::start().await;
    let cfg = pipeline_config(&server);
    let date = calendar::previous_business_day(calendar::today(&cfg.calendar), 1);
    let day = date.format("%Y-%m-%d").to_string();
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/portfolio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ticket": "C1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/poll"))
        .and(query_param("ticketId", "C1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            zip_bytes(&[("carteira.xlsx", "xlsx"), ("rentab.csv", "a;b")]),
            "application/octet-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;
    let base = tempfile::tempdir().unwrap();
    let extracted = base.path().join("extracted").join(&day);
    std::fs::create_dir_all(&extracted).unwrap();
    std::fs::write(extracted.join("previous_run.xlsx"), "old").unwrap();

    let summary = Pipeline::new(Arc::new(cfg), ReportKind::Portfolio, get_test_logger())
        .with_output_base(base.path())
        .run(date)
        .await;

    assert_eq!(summary.status, RunStatus::Success, "{:?}", summary.erros);
    assert_eq!(summary.total_arquivos, 2);
    assert_eq!(summary.output_path, extracted.display().to_string());
    assert!(extracted.join("carteira.xlsx").exists());
    assert!(extracted.join("rentab.csv").exists());
    assert!(!extracted.join("previous_run.xlsx").exists());
    assert!(base.path().join("raw").is_dir());
    assert!(!base.path().join("raw").join("C1_p1.zip").exists());
}
