//! # Ticket Requester
//!
//! Asks a report-specific endpoint to start generating a report and returns
//! the opaque job identifier. The remote side is not idempotent: every call
//! that reaches it creates a new job.

use std::fmt;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde_json::Value;

use crate::configs::FaasConfig;
use crate::core::error::NgError;
use crate::faas::auth::Token;
use crate::faas::report::{ReportKind, ReportRequest};
use crate::loggers::Logger;
use crate::retrieve::ky_http::{KyHttp, KyOptions};
use crate::{error, info, warn};

/// Server-assigned identifier of one asynchronous report job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ticket(String);

impl Ticket {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct TicketRequester {
    http: KyHttp,
    logger: Logger,
    kind: ReportKind,
    url: String,
    token_header: String,
    page_size: u32,
}

impl TicketRequester {
    pub fn new(config: &FaasConfig, kind: ReportKind, logger: Logger) -> Result<Self, NgError> {
        let url = config
            .endpoints
            .ticket_url(kind)
            .map(str::to_string)
            .ok_or_else(|| NgError::ConfigError(format!("missing ticket endpoint for {}", kind)))?;

        let opts = KyOptions {
            timeout: Some(Duration::from_secs(config.ticket.timeout_secs)),
            retry: config.ticket.max_attempts.saturating_sub(1) as usize,
            backoff_base: Duration::from_millis(config.ticket.backoff_base_ms),
            jitter: config.ticket.jitter,
            retry_on_timeout: true,
            ..KyOptions::default()
        };

        Ok(Self {
            http: KyHttp::new_with_opts(logger.clone(), Some(opts)),
            logger,
            kind,
            url,
            token_header: config.endpoints.token_header.clone(),
            page_size: config.ticket.page_size,
        })
    }

    /// Submits `request` and returns the ticket of the job it created.
    ///
    /// # Errors
    /// [`NgError::TicketError`] on non-2xx after the retry budget, a transport
    /// failure, or a body without `ticket`.
    pub async fn request(&self, token: &Token, request: &ReportRequest) -> Result<Ticket, NgError> {
        if request.kind() != self.kind {
            return Err(NgError::InternalError(format!(
                "{} requester cannot submit a {} request",
                self.kind,
                request.kind()
            )));
        }

        let body = request.ticket_body(self.page_size);
        let mut headers = token.headers(&self.token_header, "application/json")?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.kind.ticket_content_type()));

        info!(
            self.logger,
            "Requesting ticket",
            "url" => &self.url,
            "kind" => self.kind.to_string(),
            "date" => request.business_date().to_string(),
            "payload" => &body
        );

        let resp = match self.http.post::<Value, _>(&self.url, headers, &body).await {
            Ok(resp) => resp,
            Err(NgError::NonJsonResponse { status, body_snippet, .. }) => {
                return Err(self.fail(status, format!("non-JSON body: {}", body_snippet)));
            }
            Err(e) => return Err(self.fail(0, e.to_string())),
        };

        if !resp.success {
            return Err(self.fail(resp.status, resp.error_snippet()));
        }

        let ticket = resp.data.as_ref().and_then(|d| d.get("ticket")).and_then(|t| match t {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        match ticket {
            Some(id) => {
                if resp.attempts > 1 {
                    warn!(
                        self.logger,
                        "Ticket issued after retries; earlier attempts may have left orphan jobs upstream",
                        "ticket" => &id,
                        "attempts" => resp.attempts
                    );
                }
                info!(self.logger, "Ticket issued", "ticket" => &id, "attempts" => resp.attempts);
                Ok(Ticket::new(id))
            }
            None => {
                let body = resp.data.map(|d| d.to_string()).unwrap_or_default();
                Err(self.fail(resp.status, format!("ticket missing from response: {}", body)))
            }
        }
    }

    fn fail(&self, status: u16, details: String) -> NgError {
        error!(
            self.logger,
            "Ticket request failed",
            "url" => &self.url,
            "status" => status,
            "details" => &details
        );
        NgError::TicketError {
            endpoint: self.url.clone(),
            status,
            details,
        }
    }
}
