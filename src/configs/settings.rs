//! Typed configuration tree. Every policy constant of the retrieval client
//! lives here so an upstream behaviour change is a configuration edit.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::faas::report::ReportKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FaasConfig {
    pub auth: AuthConfig,
    pub endpoints: EndpointConfig,
    pub ticket: TicketConfig,
    pub polling: PollingConfig,
    pub pages: PageLimits,
    pub filters: FilterConfig,
    pub output: OutputConfig,
    pub calendar: CalendarConfig,
}

/// Client-credentials grant against the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    pub url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub grant_type: String,
    pub scopes: ScopeConfig,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub jitter: f64,
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: None,
            client_id: None,
            client_secret: None,
            grant_type: "client_credentials".to_string(),
            scopes: ScopeConfig::default(),
            max_attempts: 3,
            backoff_base_ms: 2000,
            jitter: 0.3,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ScopeConfig {
    pub portfolio: Option<String>,
    pub profitability: Option<String>,
    pub cash_statement: Option<String>,
}

impl ScopeConfig {
    pub fn for_kind(&self, kind: ReportKind) -> Option<&str> {
        match kind {
            ReportKind::Portfolio => self.portfolio.as_deref(),
            ReportKind::Profitability => self.profitability.as_deref(),
            ReportKind::CashStatement => self.cash_statement.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Shared job-status endpoint (`ticketId`, `pageNumber`).
    pub poll_url: Option<String>,
    pub portfolio_url: Option<String>,
    pub profitability_url: Option<String>,
    pub cash_statement_url: Option<String>,
    /// Header carrying the bearer token.
    pub token_header: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            poll_url: None,
            portfolio_url: None,
            profitability_url: None,
            cash_statement_url: None,
            token_header: "X-SecureConnect-Token".to_string(),
        }
    }
}

impl EndpointConfig {
    pub fn ticket_url(&self, kind: ReportKind) -> Option<&str> {
        match kind {
            ReportKind::Portfolio => self.portfolio_url.as_deref(),
            ReportKind::Profitability => self.profitability_url.as_deref(),
            ReportKind::CashStatement => self.cash_statement_url.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TicketConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub jitter: f64,
    pub timeout_secs: u64,
    pub page_size: u32,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 2000,
            jitter: 0.3,
            timeout_secs: 30,
            page_size: 100,
        }
    }
}

/// Attempt budget for one age bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BudgetConfig {
    pub max_attempts: u32,
    pub wait_ms: u64,
    pub ceiling_ms: u64,
}

impl BudgetConfig {
    pub const fn new(max_attempts: u32, wait_secs: u64, ceiling_secs: u64) -> Self {
        Self {
            max_attempts,
            wait_ms: wait_secs * 1000,
            ceiling_ms: ceiling_secs * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    /// `result` strings meaning "job not finished".
    pub processing_sentinels: Vec<String>,
    /// Consecutive processing answers that, on an old date, confirm absence.
    pub absence_streak: u32,
    /// Dates strictly older than this many days are eligible for absence confirmation.
    pub absence_min_age_days: i64,
    /// Pause before retrying with a fresh token after a 401.
    pub auth_retry_delay_ms: u64,
    /// 401 answers tolerated per page before giving up.
    pub max_auth_refreshes: u32,
    pub timeout_secs: u64,
    /// Pause between ticket creation and the first poll.
    pub initial_delay_ms: u64,
    /// Ages strictly above this use the `stale` budget.
    pub stale_after_days: i64,
    /// Ages from this up to `stale_after_days` use the `aging` budget.
    pub aging_after_days: i64,
    pub stale: BudgetConfig,
    pub aging: BudgetConfig,
    pub fresh: BudgetConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            processing_sentinels: vec![
                "Processando".to_string(),
                "Aguardando processamento".to_string(),
            ],
            absence_streak: 3,
            absence_min_age_days: 30,
            auth_retry_delay_ms: 2000,
            max_auth_refreshes: 5,
            timeout_secs: 60,
            initial_delay_ms: 3000,
            stale_after_days: 30,
            aging_after_days: 7,
            stale: BudgetConfig::new(4, 10, 60),
            aging: BudgetConfig::new(5, 15, 90),
            fresh: BudgetConfig::new(6, 20, 120),
        }
    }
}

impl PollingConfig {
    pub fn auth_retry_delay(&self) -> Duration {
        Duration::from_millis(self.auth_retry_delay_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Hard page ceiling per report kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PageLimits {
    pub portfolio: u32,
    pub profitability: u32,
    pub cash_statement: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            portfolio: 1,
            profitability: 5,
            cash_statement: 2,
        }
    }
}

impl PageLimits {
    pub fn for_kind(&self, kind: ReportKind) -> u32 {
        match kind {
            ReportKind::Portfolio => self.portfolio,
            ReportKind::Profitability => self.profitability,
            ReportKind::CashStatement => self.cash_statement,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub fund_name: String,
    pub portfolio_type_report: u32,
    pub profitability_indexers: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            fund_name: String::new(),
            portfolio_type_report: 10,
            profitability_indexers: vec!["CDIE".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub base_dir: String,
    /// Remove `*.json` left by earlier runs in the date directory.
    pub clean_stale: bool,
    /// Keep the downloaded ZIP next to the extracted files.
    pub keep_archives: bool,
    pub log_dir: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: "output".to_string(),
            clean_stale: true,
            keep_archives: false,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalendarConfig {
    /// IANA zone used to decide what "today" is.
    pub timezone: String,
    pub max_age_days: i64,
    pub recent_warning_days: i64,
    pub archived_warning_days: i64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Sao_Paulo".to_string(),
            max_age_days: 730,
            recent_warning_days: 3,
            archived_warning_days: 180,
        }
    }
}
