//! # Report Pipeline
//!
//! One report request end to end: date pre-flight, token, ticket, pages,
//! summary. Every failure is folded into the returned [`RunSummary`]; nothing
//! escapes as a panic or an `Err`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tokio::time::sleep;

use crate::configs::FaasConfig;
use crate::core::error::NgError;
use crate::faas::auth::TokenManager;
use crate::faas::calendar;
use crate::faas::pagination::{PaginationDriver, PaginationReport};
use crate::faas::poller::AdaptivePoller;
use crate::faas::report::{ReportFilter, ReportKind, ReportRequest};
use crate::faas::sink::{FileSink, ResultSink};
use crate::faas::summary::RunSummary;
use crate::faas::ticket::{Ticket, TicketRequester};
use crate::loggers::Logger;
use crate::{error, info, warn};

pub struct Pipeline {
    config: Arc<FaasConfig>,
    kind: ReportKind,
    output_base: PathBuf,
    output_dir: Option<PathBuf>,
    logger: Logger,
}

impl Pipeline {
    pub fn new(config: Arc<FaasConfig>, kind: ReportKind, logger: Logger) -> Self {
        let output_base = PathBuf::from(&config.output.base_dir);
        Self {
            config,
            kind,
            output_base,
            output_dir: None,
            logger,
        }
    }

    /// Overrides `output.base_dir`.
    pub fn with_output_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.output_base = base.into();
        self
    }

    /// Puts page artifacts in `dir` instead of the kind's directory under the base.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Directory receiving page artifacts.
    pub fn output_dir(&self, business_date: NaiveDate) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => self.kind.artifact_dir(&self.output_base, business_date),
        }
    }

    /// Directory receiving spreadsheets unpacked from archive payloads.
    pub fn extract_dir(&self, business_date: NaiveDate) -> Option<PathBuf> {
        self.kind.extract_dir(&self.output_base, business_date)
    }

    pub async fn run(&self, business_date: NaiveDate) -> RunSummary {
        let started = Instant::now();
        let date = business_date.format("%Y-%m-%d").to_string();
        let out_dir = self.output_dir(business_date);
        let extract_dir = self.extract_dir(business_date);
        // The summary points at whatever ingestion reads next.
        let out_path = extract_dir.as_ref().unwrap_or(&out_dir).display().to_string();

        info!(
            self.logger,
            "Pipeline started",
            "kind" => self.kind.to_string(),
            "date" => &date,
            "output" => &out_path
        );

        let mut issued: Option<Ticket> = None;
        let summary = match self.execute(business_date, &out_dir, extract_dir.as_deref(), &mut issued).await {
            Ok(report) => {
                let errors: Vec<String> = report.error.iter().map(|e| e.to_string()).collect();
                RunSummary::new(
                    report.total_files(),
                    report.total_bytes(),
                    started.elapsed(),
                    errors,
                    &date,
                    &out_path,
                    issued.as_ref().map(Ticket::to_string),
                )
            }
            Err(e) => {
                error!(self.logger, "Pipeline failed", "kind" => self.kind.to_string(), "date" => &date, "error" => e.to_string());
                let mut summary = RunSummary::failed(&e, started.elapsed(), &date, &out_path);
                summary.ticket = issued.as_ref().map(Ticket::to_string);
                summary
            }
        };

        info!(
            self.logger,
            "Pipeline finished",
            "kind" => self.kind.to_string(),
            "date" => &date,
            "status" => summary.status,
            "files" => summary.total_arquivos,
            "bytes" => summary.tamanho_total,
            "seconds" => summary.duracao_segundos
        );
        summary
    }

    async fn execute(
        &self,
        business_date: NaiveDate,
        out_dir: &Path,
        extract_dir: Option<&Path>,
        issued: &mut Option<Ticket>,
    ) -> Result<PaginationReport, NgError> {
        let config = self.config.as_ref();
        config.validate(self.kind)?;

        let today = calendar::today(&config.calendar);
        let check = calendar::check_business_date(business_date, today, &config.calendar)?;
        for warning in &check.warnings {
            warn!(self.logger, "Business date warning", "date" => business_date.to_string(), "warning" => warning);
        }

        let tokens = TokenManager::new(config, self.kind, self.logger.clone())?;
        let requester = TicketRequester::new(config, self.kind, self.logger.clone())?;
        let poller = AdaptivePoller::new(config, self.kind, self.logger.clone())?;
        let mut sink = FileSink::new(out_dir, self.logger.clone())
            .with_clean_stale(config.output.clean_stale)
            .with_keep_archives(config.output.keep_archives);
        if let Some(dir) = extract_dir {
            sink = sink.with_extract_dir(dir);
        }
        sink.prepare()?;

        let request = ReportRequest::new(business_date, ReportFilter::from_config(self.kind, config));

        let token = tokens.acquire().await?;
        let ticket = requester.request(&token, &request).await?;
        drop(token);
        *issued = Some(ticket.clone());

        let settle = config.polling.initial_delay();
        if !settle.is_zero() {
            info!(self.logger, "Waiting for the job to start", "ticket" => ticket.id(), "delay_ms" => settle.as_millis() as u64);
            sleep(settle).await;
        }

        let driver = PaginationDriver::new(
            &poller,
            &tokens,
            &sink as &dyn ResultSink,
            config.pages.for_kind(self.kind),
            self.logger.clone(),
        );
        Ok(driver.run(&ticket, business_date, check.age_days).await)
    }
}
