//! # Adaptive Poller
//!
//! Drives one `(ticket, page)` to a terminal state. Each attempt takes a fresh
//! token, issues a single GET against the job-status endpoint and classifies
//! whatever comes back. The classification feeds a small state machine that
//! tells "still computing" apart from "will never exist" using the age of the
//! business date and the number of consecutive processing answers.
//!
//! ```text
//! Requesting -> AwaitingResult -> Ready
//!      ^              |        -> ConfirmedAbsent
//!      +--------------+        -> Exhausted
//!                              -> Failed
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;

use crate::configs::FaasConfig;
use crate::core::error::NgError;
use crate::faas::auth::TokenManager;
use crate::faas::budget::{BudgetPolicy, PollBudget};
use crate::faas::report::{PayloadFormat, ReportKind};
use crate::faas::ticket::Ticket;
use crate::loggers::Logger;
use crate::retrieve::ky_http::{KyHttp, KyOptions, RawResponse};
use crate::{debug, error, info, warn};

/// Substrings of a `result` string that mark a server-side job failure.
const ERROR_MARKERS: &[&str] = &["erro", "error"];

/// ZIP local-file and empty-archive signatures.
const ZIP_SIGNATURES: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollState {
    Requesting,
    AwaitingResult,
    Ready,
    ConfirmedAbsent,
    Exhausted,
    Failed,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Requesting | PollState::AwaitingResult)
    }
}

/// Body of a finished page.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Archive(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransientKind {
    /// 401: the token died between issue and use.
    TokenExpired,
    /// The token endpoint itself failed for this attempt.
    TokenUnavailable(String),
    HttpStatus(u16),
    UnexpectedContentType(String),
    InvalidJson(String),
    Network(String),
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::TokenExpired => write!(f, "token expired (HTTP 401)"),
            TransientKind::TokenUnavailable(e) => write!(f, "token unavailable: {}", e),
            TransientKind::HttpStatus(s) => write!(f, "HTTP {}", s),
            TransientKind::UnexpectedContentType(ct) => write!(f, "unexpected content type '{}'", ct),
            TransientKind::InvalidJson(e) => write!(f, "invalid JSON body: {}", e),
            TransientKind::Network(e) => write!(f, "network error: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FatalKind {
    /// The job answered with an error string in `result`.
    ServerError(String),
    /// Fresh tokens kept being rejected.
    AuthRejected(u32),
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalKind::ServerError(msg) => write!(f, "server reported: {}", msg),
            FatalKind::AuthRejected(n) => write!(f, "token rejected {} times in a row", n),
        }
    }
}

/// Classification of a single poll attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Ready {
        payload: Payload,
        page: Option<u32>,
        total_pages: Option<u32>,
    },
    Processing,
    NoDataConfirmed(String),
    TransientError(TransientKind),
    FatalError(FatalKind),
}

/// Terminal outcome of a page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Ready {
        payload: Payload,
        page: Option<u32>,
        total_pages: Option<u32>,
        attempts: u32,
    },
    ConfirmedAbsent {
        reason: String,
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },
    Failed {
        reason: String,
        attempts: u32,
    },
}

impl PageOutcome {
    pub fn state(&self) -> PollState {
        match self {
            PageOutcome::Ready { .. } => PollState::Ready,
            PageOutcome::ConfirmedAbsent { .. } => PollState::ConfirmedAbsent,
            PageOutcome::Exhausted { .. } => PollState::Exhausted,
            PageOutcome::Failed { .. } => PollState::Failed,
        }
    }

    /// `Ready` and `ConfirmedAbsent` both end the page successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, PageOutcome::Ready { .. } | PageOutcome::ConfirmedAbsent { .. })
    }

    /// The error to propagate for failed outcomes.
    pub fn to_error(&self, ticket: &Ticket, page: u32) -> Option<NgError> {
        match self {
            PageOutcome::Exhausted { attempts, elapsed, last_error } => Some(NgError::PollExhausted {
                ticket: ticket.to_string(),
                page,
                attempts: *attempts,
                elapsed_ms: elapsed.as_millis() as u64,
                last_error: last_error.clone(),
            }),
            PageOutcome::Failed { reason, .. } => Some(NgError::PollFailed {
                ticket: ticket.to_string(),
                page,
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// Reads `page`/`totalPages` whether the server sent them as numbers or numeric strings.
pub fn page_number(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Classifies one HTTP answer of the polling endpoint.
///
/// Never yields `NoDataConfirmed`: absence depends on history, which only the
/// state machine in [`AdaptivePoller`] has.
pub fn classify_response(resp: &RawResponse, format: PayloadFormat, sentinels: &[String]) -> PollResult {
    match resp.status {
        401 => return PollResult::TransientError(TransientKind::TokenExpired),
        200 => {}
        other => return PollResult::TransientError(TransientKind::HttpStatus(other)),
    }

    if !resp.is_json() {
        let is_zip = ZIP_SIGNATURES.iter().any(|sig| resp.body.starts_with(sig));
        if format == PayloadFormat::Archive && is_zip {
            return PollResult::Ready {
                payload: Payload::Archive(resp.body.clone()),
                page: None,
                total_pages: None,
            };
        }
        return PollResult::TransientError(TransientKind::UnexpectedContentType(resp.content_type.clone()));
    }

    let data: Value = match serde_json::from_slice(&resp.body) {
        Ok(v) => v,
        Err(e) => return PollResult::TransientError(TransientKind::InvalidJson(e.to_string())),
    };

    if let Some(Value::String(result)) = data.get("result") {
        let trimmed = result.trim();
        if sentinels.iter().any(|s| s.as_str() == trimmed) {
            return PollResult::Processing;
        }
        let lower = trimmed.to_lowercase();
        if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
            return PollResult::FatalError(FatalKind::ServerError(result.clone()));
        }
    }

    // A list is the normal answer; any other shape is persisted verbatim rather than dropped.
    PollResult::Ready {
        page: page_number(data.get("page")),
        total_pages: page_number(data.get("totalPages")),
        payload: Payload::Json(data),
    }
}

pub struct AdaptivePoller {
    http: KyHttp,
    logger: Logger,
    kind: ReportKind,
    poll_url: String,
    token_header: String,
    policy: BudgetPolicy,
    sentinels: Vec<String>,
    absence_streak: u32,
    absence_min_age_days: i64,
    auth_retry_delay: Duration,
    max_auth_refreshes: u32,
}

impl AdaptivePoller {
    pub fn new(config: &FaasConfig, kind: ReportKind, logger: Logger) -> Result<Self, NgError> {
        let poll_url = config
            .endpoints
            .poll_url
            .clone()
            .ok_or_else(|| NgError::ConfigError("missing keys: endpoints.poll_url".into()))?;

        // Retries are this module's job; the transport only bounds each call.
        let opts = KyOptions {
            timeout: Some(Duration::from_secs(config.polling.timeout_secs)),
            retry: 0,
            ..KyOptions::default()
        };

        Ok(Self {
            http: KyHttp::new_with_opts(logger.clone(), Some(opts)),
            logger,
            kind,
            poll_url,
            token_header: config.endpoints.token_header.clone(),
            policy: BudgetPolicy::from_config(&config.polling),
            sentinels: config.polling.processing_sentinels.clone(),
            absence_streak: config.polling.absence_streak.max(1),
            absence_min_age_days: config.polling.absence_min_age_days,
            auth_retry_delay: config.polling.auth_retry_delay(),
            max_auth_refreshes: config.polling.max_auth_refreshes,
        })
    }

    pub fn policy(&self) -> &BudgetPolicy {
        &self.policy
    }

    /// One token + GET round trip, classified.
    async fn attempt(&self, tokens: &TokenManager, ticket: &Ticket, page: u32) -> (PollResult, Option<u16>) {
        let token = match tokens.acquire().await {
            Ok(token) => token,
            Err(e) => return (PollResult::TransientError(TransientKind::TokenUnavailable(e.to_string())), None),
        };
        let headers = match token.headers(&self.token_header, self.kind.poll_accept()) {
            Ok(h) => h,
            Err(e) => return (PollResult::TransientError(TransientKind::TokenUnavailable(e.to_string())), None),
        };

        let query = [("ticketId", ticket.id().to_string()), ("pageNumber", page.to_string())];
        match self.http.fetch_raw(&self.poll_url, headers, &query).await {
            Ok(resp) => {
                let result = classify_response(&resp, self.kind.payload_format(), &self.sentinels);
                if let PollResult::TransientError(_) = &result {
                    debug!(
                        self.logger,
                        "Unusable poll response",
                        "status" => resp.status,
                        "content_type" => &resp.content_type,
                        "snippet" => resp.body_snippet(250)
                    );
                }
                (result, Some(resp.status))
            }
            Err(e) => (PollResult::TransientError(TransientKind::Network(e.to_string())), None),
        }
    }

    /// Polls `(ticket, page)` until it is ready, confirmed absent, failed, or out of budget.
    ///
    /// `age_days` is the business-date age at dispatch time; it selects the
    /// budget and gates absence confirmation.
    pub async fn poll_page(&self, tokens: &TokenManager, ticket: &Ticket, page: u32, age_days: i64) -> PageOutcome {
        let budget: PollBudget = self.policy.budget_for(age_days);
        let started = Instant::now();

        info!(
            self.logger,
            "Polling page",
            "ticket" => ticket.id(),
            "page" => page,
            "age_days" => age_days,
            "bucket" => budget.bucket,
            "max_attempts" => budget.max_attempts,
            "wait_ms" => budget.wait.as_millis() as u64,
            "ceiling_ms" => budget.ceiling.as_millis() as u64
        );

        let mut attempts: u32 = 0;
        let mut consecutive_processing: u32 = 0;
        let mut auth_refreshes: u32 = 0;
        let mut last_error = String::from("no attempt completed");
        let mut state = PollState::Requesting;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= budget.ceiling {
                return self.exhausted(ticket, page, attempts, elapsed, last_error, "wall-clock ceiling reached");
            }

            attempts += 1;
            debug!(self.logger, "Poll state", "ticket" => ticket.id(), "page" => page, "state" => state);
            let (result, status) = self.attempt(tokens, ticket, page).await;
            state = PollState::AwaitingResult;
            let elapsed = started.elapsed();
            let streak = match &result {
                PollResult::Processing => consecutive_processing + 1,
                PollResult::TransientError(TransientKind::TokenExpired) => consecutive_processing,
                _ => 0,
            };

            info!(
                self.logger,
                "Poll attempt",
                "ticket" => ticket.id(),
                "page" => page,
                "attempt" => attempts,
                "max_attempts" => budget.max_attempts,
                "elapsed_ms" => elapsed.as_millis() as u64,
                "status" => status,
                "state" => state,
                "result" => describe(&result),
                "consecutive_processing" => streak
            );

            let wait = match result {
                PollResult::Ready { payload, page: declared_page, total_pages } => {
                    info!(self.logger, "Page ready", "ticket" => ticket.id(), "page" => page, "attempts" => attempts);
                    return PageOutcome::Ready {
                        payload,
                        page: declared_page,
                        total_pages,
                        attempts,
                    };
                }
                PollResult::NoDataConfirmed(reason) => {
                    return PageOutcome::ConfirmedAbsent { reason, attempts };
                }
                PollResult::FatalError(kind) => {
                    error!(self.logger, "Page failed", "ticket" => ticket.id(), "page" => page, "reason" => kind.to_string());
                    return PageOutcome::Failed {
                        reason: kind.to_string(),
                        attempts,
                    };
                }
                PollResult::TransientError(TransientKind::TokenExpired) => {
                    // A rejected token is not a spent attempt and says nothing about the job.
                    attempts -= 1;
                    auth_refreshes += 1;
                    if auth_refreshes > self.max_auth_refreshes {
                        let reason = FatalKind::AuthRejected(auth_refreshes).to_string();
                        error!(self.logger, "Page failed", "ticket" => ticket.id(), "page" => page, "reason" => &reason);
                        return PageOutcome::Failed { reason, attempts };
                    }
                    warn!(
                        self.logger,
                        "Token expired mid-poll, retrying with a fresh one",
                        "ticket" => ticket.id(),
                        "page" => page,
                        "refreshes" => auth_refreshes
                    );
                    last_error = TransientKind::TokenExpired.to_string();
                    state = PollState::Requesting;
                    sleep(self.auth_retry_delay).await;
                    continue;
                }
                PollResult::TransientError(kind) => {
                    consecutive_processing = 0;
                    warn!(
                        self.logger,
                        "Transient poll failure",
                        "ticket" => ticket.id(),
                        "page" => page,
                        "attempt" => attempts,
                        "error" => kind.to_string()
                    );
                    last_error = kind.to_string();
                    budget.wait
                }
                PollResult::Processing => {
                    consecutive_processing += 1;
                    last_error = format!("report still processing after {} consecutive answers", consecutive_processing);

                    if consecutive_processing >= self.absence_streak && age_days > self.absence_min_age_days {
                        let reason = format!(
                            "business date is {} days old and the job answered 'processing' {} times in a row",
                            age_days, consecutive_processing
                        );
                        info!(self.logger, "No data confirmed", "ticket" => ticket.id(), "page" => page, "reason" => &reason);
                        return PageOutcome::ConfirmedAbsent { reason, attempts };
                    }
                    budget.wait
                }
            };

            if attempts >= budget.max_attempts {
                return self.exhausted(ticket, page, attempts, started.elapsed(), last_error, "attempt budget spent");
            }
            if started.elapsed() + wait >= budget.ceiling {
                return self.exhausted(ticket, page, attempts, started.elapsed(), last_error, "next wait crosses the wall-clock ceiling");
            }

            state = PollState::Requesting;
            sleep(wait).await;
        }
    }

    fn exhausted(&self, ticket: &Ticket, page: u32, attempts: u32, elapsed: Duration, last_error: String, why: &str) -> PageOutcome {
        error!(
            self.logger,
            "Polling exhausted",
            "ticket" => ticket.id(),
            "page" => page,
            "attempts" => attempts,
            "elapsed_ms" => elapsed.as_millis() as u64,
            "why" => why,
            "last_error" => &last_error
        );
        PageOutcome::Exhausted {
            attempts,
            elapsed,
            last_error,
        }
    }
}

fn describe(result: &PollResult) -> String {
    match result {
        PollResult::Ready { payload: Payload::Json(data), .. } => match data.get("result") {
            Some(Value::Array(items)) => format!("ready ({} records)", items.len()),
            _ => "ready (unexpected shape)".to_string(),
        },
        PollResult::Ready { payload: Payload::Archive(bytes), .. } => format!("ready (archive, {} bytes)", bytes.len()),
        PollResult::Processing => "processing".to_string(),
        PollResult::NoDataConfirmed(reason) => format!("no data: {}", reason),
        PollResult::TransientError(kind) => format!("transient: {}", kind),
        PollResult::FatalError(kind) => format!("fatal: {}", kind),
    }
}
