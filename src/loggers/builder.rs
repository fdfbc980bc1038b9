use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use crate::loggers::worker::LogWorker;
use crate::loggers::core::{LogLevel, LogRecord};
use crate::loggers::transports::{FileTransport, StderrTransport, Transport};
use std::collections::BTreeMap;
use std::path::PathBuf;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use arc_swap::ArcSwap;

pub struct LoggerConfig {
    pub level: LogLevel,
    pub component: String,
}

#[derive(Clone)]
pub struct Logger {
    pub sender: mpsc::Sender<LogRecord>,
    pub config: Arc<ArcSwap<LoggerConfig>>,
}

impl Logger {
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.config.load().level
    }

    /// Queues a record for the worker. A full queue drops the record rather
    /// than blocking the caller.
    pub fn emit(&self, level: LogLevel, target: &str, msg: impl ToString, ctx: BTreeMap<String, Value>) {
        let record = LogRecord {
            ts: Utc::now(),
            level,
            msg: msg.to_string(),
            component: self.config.load().component.clone(),
            target: target.to_string(),
            ctx,
            sys: None,
        };
        let _ = self.sender.try_send(record);
    }

    /// Changes the minimum level for every clone of this logger.
    pub fn set_level(&self, level: LogLevel) {
        let current = self.config.load();
        self.config.store(Arc::new(LoggerConfig {
            level,
            component: current.component.clone(),
        }));
    }
}

pub struct LoggerBuilder {
    component: String,
    level: LogLevel,
    buffer_size: usize,
    log_dir: Option<PathBuf>,
    console: bool,
}

impl LoggerBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            level: LogLevel::Info,
            buffer_size: 1024,
            log_dir: None,
            console: true,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Also append every record to a daily file under `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn build(self) -> Result<Logger, crate::core::error::NgError> {
        self.spawn().map(|(logger, _)| logger)
    }

    /// Like `build`, but hands back the worker handle so callers can await the
    /// drain once every `Logger` clone is dropped.
    pub fn spawn(self) -> Result<(Logger, JoinHandle<()>), crate::core::error::NgError> {
        let mut transports: Vec<Box<dyn Transport>> = Vec::new();
        if self.console {
            transports.push(Box::new(StderrTransport));
        }
        if let Some(dir) = &self.log_dir {
            transports.push(Box::new(FileTransport::open(dir, &self.component)?));
        }

        let (tx, rx) = mpsc::channel(self.buffer_size);
        let config = Arc::new(ArcSwap::from_pointee(LoggerConfig {
            level: self.level,
            component: self.component,
        }));

        let worker = LogWorker::new(rx, transports);
        let handle = tokio::spawn(async move {
            worker.run().await;
        });

        Ok((Logger { sender: tx, config }, handle))
    }
}
