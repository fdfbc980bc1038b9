use serde::{Deserialize, Serialize};
use serde_json::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace, Debug, Info, Warn, Error, Fatal,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogRecord {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub msg: String,
    pub component: String,
    /// Module that emitted the record.
    pub target: String,
    pub ctx: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sys: Option<SysInfo>,
}

#[derive(Debug, Serialize)]
pub struct SysInfo {
    pub cpu_usage: f32,
    pub mem_used_kb: u64,
    pub load_avg: Vec<f64>,
    pub uptime_secs: u64,
}
