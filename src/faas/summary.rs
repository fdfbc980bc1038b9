//! # Run Summary
//!
//! The single JSON line the orchestrator reads from standard output.

use std::process::ExitCode;
use std::time::Duration;

use serde::Serialize;

use crate::core::error::NgError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    #[serde(rename = "SUCESSO")]
    Success,
    #[serde(rename = "FALHA")]
    Failure,
    #[serde(rename = "SEM_DADOS")]
    NoData,
}

impl RunStatus {
    /// Any recorded error fails the run, even after earlier pages were written.
    /// A clean run is `Success` when it wrote something and `NoData` otherwise.
    pub fn classify(files: usize, errors: &[String]) -> Self {
        if !errors.is_empty() {
            RunStatus::Failure
        } else if files > 0 {
            RunStatus::Success
        } else {
            RunStatus::NoData
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Success | RunStatus::NoData => 0,
            RunStatus::Failure => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub total_arquivos: usize,
    pub tamanho_total: u64,
    pub duracao_segundos: f64,
    pub erros: Vec<String>,
    pub data_referencia: String,
    pub output_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

impl RunSummary {
    pub fn new(
        files: usize,
        bytes: u64,
        elapsed: Duration,
        errors: Vec<String>,
        business_date: &str,
        output_path: &str,
        ticket: Option<String>,
    ) -> Self {
        Self {
            status: RunStatus::classify(files, &errors),
            total_arquivos: files,
            tamanho_total: bytes,
            duracao_segundos: round_secs(elapsed),
            erros: errors,
            data_referencia: business_date.to_string(),
            output_path: output_path.to_string(),
            ticket,
        }
    }

    /// Summary of a run that failed before producing anything.
    pub fn failed(err: &NgError, elapsed: Duration, business_date: &str, output_path: &str) -> Self {
        Self::new(0, 0, elapsed, vec![err.to_string()], business_date, output_path, None)
    }

    /// Compact single-line JSON.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"status":"FALHA","total_arquivos":0,"tamanho_total":0,"duracao_segundos":0.0,"erros":["summary encode: {}"]}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.status.exit_code())
    }
}

fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
