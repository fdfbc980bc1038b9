//! # Pagination Driver
//!
//! Walks the pages of one ticket. After every successful page the persisted
//! artifact decides whether another page is worth requesting.

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::core::error::NgError;
use crate::faas::auth::TokenManager;
use crate::faas::poller::{AdaptivePoller, PageOutcome};
use crate::faas::sink::{ArtifactKind, NoDataMarker, PageArtifact, ResultSink};
use crate::faas::ticket::Ticket;
use crate::loggers::Logger;
use crate::{error, info, warn};

/// Why the driver stopped requesting pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    AbsenceMarker,
    LastDeclaredPage { page: u32, total_pages: u32 },
    EmptyFirstPage,
    /// Archive payloads carry the whole report in one download.
    SinglePayload,
    PageCeiling(u32),
    /// A page after the first did not finish; earlier pages stand.
    PageFailed { page: u32 },
    /// The first page did not finish, or an artifact could not be written.
    Aborted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::AbsenceMarker => write!(f, "absence confirmed"),
            StopReason::LastDeclaredPage { page, total_pages } => write!(f, "page {} of {} was the last", page, total_pages),
            StopReason::EmptyFirstPage => write!(f, "first page is empty"),
            StopReason::SinglePayload => write!(f, "archive payload is not paged"),
            StopReason::PageCeiling(max) => write!(f, "page ceiling {} reached", max),
            StopReason::PageFailed { page } => write!(f, "page {} did not finish", page),
            StopReason::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageDecision {
    Continue(u32),
    Stop(StopReason),
}

/// Decides what follows `artifact`, never going past `ceiling` pages.
pub fn next_page(artifact: &PageArtifact, ceiling: u32) -> PageDecision {
    if artifact.is_absence_marker() {
        return PageDecision::Stop(StopReason::AbsenceMarker);
    }
    if let (Some(page), Some(total_pages)) = (artifact.declared_page, artifact.total_pages) {
        if page >= total_pages {
            return PageDecision::Stop(StopReason::LastDeclaredPage { page, total_pages });
        }
    }
    if artifact.page == 1 && artifact.record_count == Some(0) {
        return PageDecision::Stop(StopReason::EmptyFirstPage);
    }
    if artifact.kind == ArtifactKind::Archive {
        return PageDecision::Stop(StopReason::SinglePayload);
    }
    if artifact.page >= ceiling {
        return PageDecision::Stop(StopReason::PageCeiling(ceiling));
    }
    PageDecision::Continue(artifact.page + 1)
}

/// Everything the driver produced for one ticket.
#[derive(Debug)]
pub struct PaginationReport {
    pub artifacts: Vec<PageArtifact>,
    pub stop: StopReason,
    /// Set when the run must be reported as failed.
    pub error: Option<NgError>,
}

impl PaginationReport {
    pub fn total_files(&self) -> usize {
        self.artifacts.iter().map(PageArtifact::file_count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size_bytes).sum()
    }
}

pub struct PaginationDriver<'a> {
    poller: &'a AdaptivePoller,
    tokens: &'a TokenManager,
    sink: &'a dyn ResultSink,
    ceiling: u32,
    logger: Logger,
}

impl<'a> PaginationDriver<'a> {
    pub fn new(poller: &'a AdaptivePoller, tokens: &'a TokenManager, sink: &'a dyn ResultSink, ceiling: u32, logger: Logger) -> Self {
        Self {
            poller,
            tokens,
            sink,
            ceiling: ceiling.max(1),
            logger,
        }
    }

    /// Polls and persists pages of `ticket` starting at 1.
    pub async fn run(&self, ticket: &Ticket, business_date: NaiveDate, age_days: i64) -> PaginationReport {
        let mut artifacts = Vec::new();
        let mut page = 1u32;
        let date = business_date.format("%Y-%m-%d").to_string();

        loop {
            let outcome = self.poller.poll_page(self.tokens, ticket, page, age_days).await;

            let written = match outcome {
                PageOutcome::Ready { payload, .. } => self.sink.write_page(ticket, page, &payload),
                PageOutcome::ConfirmedAbsent { reason, attempts } => {
                    let marker = NoDataMarker::new(&date, reason, attempts);
                    self.sink.write_absence(ticket, page, &marker)
                }
                failed => {
                    let err = failed.to_error(ticket, page).unwrap_or_else(|| {
                        NgError::InternalError(format!("page {} ended without an outcome", page))
                    });
                    if page == 1 {
                        error!(self.logger, "First page failed, aborting", "ticket" => ticket.id(), "error" => err.to_string());
                        return PaginationReport {
                            artifacts,
                            stop: StopReason::Aborted,
                            error: Some(err),
                        };
                    }
                    warn!(
                        self.logger,
                        "Page failed, treating as end of report",
                        "ticket" => ticket.id(),
                        "page" => page,
                        "error" => err.to_string()
                    );
                    return PaginationReport {
                        artifacts,
                        stop: StopReason::PageFailed { page },
                        error: None,
                    };
                }
            };

            let artifact = match written {
                Ok(artifact) => artifact,
                Err(e) => {
                    error!(self.logger, "Failed to persist page", "ticket" => ticket.id(), "page" => page, "error" => e.to_string());
                    return PaginationReport {
                        artifacts,
                        stop: StopReason::Aborted,
                        error: Some(e),
                    };
                }
            };

            let decision = next_page(&artifact, self.ceiling);
            artifacts.push(artifact);

            match decision {
                PageDecision::Continue(next) => page = next,
                PageDecision::Stop(stop) => {
                    info!(
                        self.logger,
                        "Pagination finished",
                        "ticket" => ticket.id(),
                        "pages" => artifacts.len(),
                        "reason" => stop.to_string()
                    );
                    return PaginationReport { artifacts, stop, error: None };
                }
            }
        }
    }
}

