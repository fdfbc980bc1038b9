//! # Report Model
//!
//! The three report families offered by the asset manager and the immutable
//! request that asks for one of them on one business date.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::configs::FaasConfig;

/// Report family. Each one has its own ticket endpoint, OAuth scope and payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Daily holdings ("carteira"). Delivered as a ZIP of spreadsheets.
    Portfolio,
    /// Fund profitability ("rentabilidade"). Paged JSON.
    Profitability,
    /// Fund account cash statement ("extrato"). Paged JSON.
    CashStatement,
}

/// How the polling endpoint delivers a finished report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Archive,
}

impl ReportKind {
    pub const ALL: [ReportKind; 3] = [
        ReportKind::Portfolio,
        ReportKind::Profitability,
        ReportKind::CashStatement,
    ];

    pub fn payload_format(&self) -> PayloadFormat {
        match self {
            ReportKind::Portfolio => PayloadFormat::Archive,
            ReportKind::Profitability | ReportKind::CashStatement => PayloadFormat::Json,
        }
    }

    /// Where page artifacts land under `base`. These are the directories the
    /// ingestion scripts read.
    ///
    /// Portfolio archives share `{base}/raw` across dates; the JSON kinds get a
    /// directory per business date.
    pub fn artifact_dir(&self, base: &Path, business_date: NaiveDate) -> PathBuf {
        let date = business_date.format("%Y-%m-%d").to_string();
        match self {
            ReportKind::Portfolio => base.join("raw"),
            ReportKind::Profitability => base.join("raw_rent").join(date),
            ReportKind::CashStatement => base.join("extrato").join(date),
        }
    }

    /// Where spreadsheets unpacked from archive payloads land, for archive kinds.
    pub fn extract_dir(&self, base: &Path, business_date: NaiveDate) -> Option<PathBuf> {
        match self.payload_format() {
            PayloadFormat::Archive => Some(base.join("extracted").join(business_date.format("%Y-%m-%d").to_string())),
            PayloadFormat::Json => None,
        }
    }

    /// `Content-Type` expected by the ticket endpoint.
    pub fn ticket_content_type(&self) -> &'static str {
        match self {
            ReportKind::Profitability => "application/json",
            ReportKind::Portfolio | ReportKind::CashStatement => "application/json-patch+json",
        }
    }

    /// `Accept` sent while polling.
    pub fn poll_accept(&self) -> &'static str {
        match self.payload_format() {
            PayloadFormat::Archive => "application/octet-stream",
            PayloadFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReportKind::Portfolio => "portfolio",
            ReportKind::Profitability => "profitability",
            ReportKind::CashStatement => "cash-statement",
        };
        f.write_str(name)
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "portfolio" | "carteira" => Ok(ReportKind::Portfolio),
            "profitability" | "rentabilidade" => Ok(ReportKind::Profitability),
            "cash-statement" | "extrato" => Ok(ReportKind::CashStatement),
            other => Err(format!("unknown report kind '{}'", other)),
        }
    }
}

/// Report-specific block merged into the ticket `contract`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportFilter {
    Portfolio {
        #[serde(rename = "typeReport")]
        type_report: u32,
        #[serde(rename = "fundName")]
        fund_name: String,
    },
    Profitability {
        indexers: Vec<String>,
        #[serde(rename = "fundName")]
        fund_name: String,
    },
    CashStatement {
        #[serde(rename = "fundName")]
        fund_name: String,
    },
}

impl ReportFilter {
    /// Filter for `kind` built from the configured defaults.
    pub fn from_config(kind: ReportKind, config: &FaasConfig) -> Self {
        let fund_name = config.filters.fund_name.clone();
        match kind {
            ReportKind::Portfolio => ReportFilter::Portfolio {
                type_report: config.filters.portfolio_type_report,
                fund_name,
            },
            ReportKind::Profitability => ReportFilter::Profitability {
                indexers: config.filters.profitability_indexers.clone(),
                fund_name,
            },
            ReportKind::CashStatement => ReportFilter::CashStatement { fund_name },
        }
    }

    pub fn kind(&self) -> ReportKind {
        match self {
            ReportFilter::Portfolio { .. } => ReportKind::Portfolio,
            ReportFilter::Profitability { .. } => ReportKind::Profitability,
            ReportFilter::CashStatement { .. } => ReportKind::CashStatement,
        }
    }
}

/// One report on one business date. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    kind: ReportKind,
    business_date: NaiveDate,
    filter: ReportFilter,
}

impl ReportRequest {
    /// Pairs a date with a filter; the kind is taken from the filter so the two cannot disagree.
    pub fn new(business_date: NaiveDate, filter: ReportFilter) -> Self {
        Self {
            kind: filter.kind(),
            business_date,
            filter,
        }
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    pub fn business_date(&self) -> NaiveDate {
        self.business_date
    }

    pub fn filter(&self) -> &ReportFilter {
        &self.filter
    }

    /// Inclusive UTC day boundaries of the business date, in the server's format.
    pub fn date_range(&self) -> (String, String) {
        let day = self.business_date.format("%Y-%m-%d");
        (
            format!("{}T00:00:00.000Z", day),
            format!("{}T23:59:59.000Z", day),
        )
    }

    /// Body for the report-specific ticket endpoint.
    pub fn ticket_body(&self, page_size: u32) -> Value {
        let (start, end) = self.date_range();
        let mut contract = json!({
            "startDate": start,
            "endDate": end,
        });
        if let (Some(target), Value::Object(extra)) = (
            contract.as_object_mut(),
            serde_json::to_value(&self.filter).unwrap_or(Value::Null),
        ) {
            target.extend(extra);
        }

        json!({
            "contract": contract,
            "pageSize": page_size,
            "webhookEndpoint": "",
        })
    }
}
