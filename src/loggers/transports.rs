//! Output sinks for rendered log lines.
//!
//! Standard output belongs to the run summary, so the console transport
//! always writes to standard error.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::core::error::NgError;

/// Destination for one rendered JSON log line.
pub trait Transport: Send {
    fn write_line(&mut self, line: &str);
}

/// Writes every line to standard error.
pub struct StderrTransport;

impl Transport for StderrTransport {
    fn write_line(&mut self, line: &str) {
        eprintln!("{}", line);
    }
}

/// Appends lines to `{dir}/{component}_{YYYYMMDD}.log`.
pub struct FileTransport {
    path: PathBuf,
    file: File,
}

impl FileTransport {
    pub fn open(dir: &Path, component: &str) -> Result<Self, NgError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_{}.log", component, Local::now().format("%Y%m%d")));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for FileTransport {
    fn write_line(&mut self, line: &str) {
        // a failing log file must never take the pipeline down
        let _ = writeln!(self.file, "{}", line);
    }
}
