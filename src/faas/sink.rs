//! # Result Sink
//!
//! Persists finished pages for the ingestion scripts, which glob the date
//! directory for `*.json` and read `result` as a list of records.
//!
//! File names are a pure function of `(ticket, page)`:
//! `{ticket}_p{page}.json` for data, `{ticket}_p{page}_no_data.json` for a
//! confirmed absence, `{ticket}_p{page}.zip` for archive payloads.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use zip::ZipArchive;

use crate::core::error::NgError;
use crate::faas::poller::{Payload, page_number};
use crate::faas::ticket::Ticket;
use crate::loggers::Logger;
use crate::{info, warn};

/// Upper bound for a single extracted member.
const MAX_MEMBER_SIZE: u64 = 500 * 1024 * 1024;

const EXTRACTED_DIR: &str = "extracted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Data,
    NoData,
    Archive,
}

/// One persisted page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageArtifact {
    pub ticket: String,
    pub page: u32,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Length of `result` when it is a list.
    pub record_count: Option<usize>,
    /// `page` as declared inside the payload.
    pub declared_page: Option<u32>,
    pub total_pages: Option<u32>,
    /// Spreadsheets unpacked from an archive payload.
    pub extracted: Vec<PathBuf>,
}

impl PageArtifact {
    pub fn is_absence_marker(&self) -> bool {
        self.kind == ArtifactKind::NoData
    }

    /// Files this artifact contributes to the run's file count.
    pub fn file_count(&self) -> usize {
        match self.kind {
            ArtifactKind::Archive => self.extracted.len(),
            ArtifactKind::Data | ArtifactKind::NoData => 1,
        }
    }
}

/// Synthetic page written when absence is confirmed. Shares the schema of a
/// real page so ingestion treats it as "zero records".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoDataMarker {
    pub result: Vec<Value>,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
    pub page: u32,
    pub message: String,
    pub detection_reason: String,
    pub attempts: u32,
}

impl NoDataMarker {
    /// `page` is always 1 whatever page confirmed the absence; the file name
    /// keeps the real page.
    pub fn new(business_date: &str, detection_reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            result: Vec::new(),
            total_pages: 0,
            page: 1,
            message: format!("Sem dados disponíveis para {}", business_date),
            detection_reason: detection_reason.into(),
            attempts,
        }
    }
}

pub fn artifact_file_name(ticket: &Ticket, page: u32, kind: ArtifactKind) -> String {
    match kind {
        ArtifactKind::Data => format!("{}_p{}.json", ticket, page),
        ArtifactKind::NoData => format!("{}_p{}_no_data.json", ticket, page),
        ArtifactKind::Archive => format!("{}_p{}.zip", ticket, page),
    }
}

/// Destination of finished pages.
pub trait ResultSink {
    /// Creates the destination and drops leftovers of earlier runs.
    fn prepare(&self) -> Result<(), NgError>;

    fn write_page(&self, ticket: &Ticket, page: u32, payload: &Payload) -> Result<PageArtifact, NgError>;

    fn write_absence(&self, ticket: &Ticket, page: u32, marker: &NoDataMarker) -> Result<PageArtifact, NgError>;

    fn location(&self) -> &Path;
}

/// Writes artifacts into the directory the ingestion step reads for one report kind.
pub struct FileSink {
    dir: PathBuf,
    extract_dir: PathBuf,
    /// `dir` also holds artifacts of other dates.
    shared_dir: bool,
    clean_stale: bool,
    keep_archives: bool,
    logger: Logger,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>, logger: Logger) -> Self {
        let dir = dir.into();
        Self {
            extract_dir: dir.join(EXTRACTED_DIR),
            dir,
            shared_dir: false,
            clean_stale: true,
            keep_archives: false,
            logger,
        }
    }

    pub fn with_clean_stale(mut self, clean: bool) -> Self {
        self.clean_stale = clean;
        self
    }

    pub fn with_keep_archives(mut self, keep: bool) -> Self {
        self.keep_archives = keep;
        self
    }

    /// Unpacks archives into `dir` instead of `{artifact dir}/extracted`.
    ///
    /// The artifact directory then keeps archives of every date, so `prepare`
    /// only clears unfinished `.part` files there.
    pub fn with_extract_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extract_dir = dir.into();
        self.shared_dir = true;
        self
    }

    pub fn extract_location(&self) -> &Path {
        &self.extract_dir
    }

    /// Removes the files of `dir` whose extension is one of `extensions`.
    fn remove_matching(&self, dir: &Path, extensions: &[&str]) -> Result<usize, NgError> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0usize;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let matches = path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| extensions.iter().any(|wanted| ext.eq_ignore_ascii_case(wanted)))
                    .unwrap_or(false);
            if matches {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(self.logger, "Failed to remove stale artifact", "path" => path.display().to_string(), "error" => e.to_string()),
                }
            }
        }
        Ok(removed)
    }

    fn write_json(&self, path: &Path, value: &impl Serialize) -> Result<u64, NgError> {
        let rendered = serde_json::to_string_pretty(value)
            .map_err(|e| NgError::InternalError(format!("JSON encode: {}", e)))?;
        self.write_bytes(path, rendered.as_bytes())
    }

    /// Write-then-rename so a glob never sees a half-written file.
    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<u64, NgError> {
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("part");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(bytes.len() as u64)
    }

    /// A key is either data or absence, never both.
    fn remove_counterpart(&self, ticket: &Ticket, page: u32, written: ArtifactKind) {
        let other = match written {
            ArtifactKind::Data | ArtifactKind::Archive => ArtifactKind::NoData,
            ArtifactKind::NoData => ArtifactKind::Data,
        };
        let path = self.dir.join(artifact_file_name(ticket, page, other));
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(self.logger, "Failed to remove superseded artifact", "path" => path.display().to_string(), "error" => e.to_string());
            }
        }
    }

    fn extract_archive(&self, archive_path: &Path) -> Result<Vec<PathBuf>, NgError> {
        fs::create_dir_all(&self.extract_dir)?;

        let file = fs::File::open(archive_path)?;
        let mut archive = ZipArchive::new(file)?;
        let mut taken: HashSet<String> = HashSet::new();
        let mut extracted = Vec::new();

        for i in 0..archive.len() {
            let member = archive.by_index(i)?;
            let name = member.name().to_string();
            let lower = name.to_ascii_lowercase();
            if member.is_dir() || name.starts_with("__MACOSX/") || !(lower.ends_with(".csv") || lower.ends_with(".xlsx")) {
                continue;
            }
            if member.size() > MAX_MEMBER_SIZE {
                return Err(NgError::ArchiveError(format!("member {} is larger than {} bytes", name, MAX_MEMBER_SIZE)));
            }

            // Members are flattened so nothing escapes the output directory. A
            // base name seen before falls back to the whole member path.
            let Some(base) = Path::new(&name).file_name().and_then(|b| b.to_str()) else {
                continue;
            };
            let file_name = if taken.insert(base.to_string()) {
                base.to_string()
            } else {
                let flat = name.trim_matches('/').replace(['/', '\\'], "_");
                if !taken.insert(flat.clone()) {
                    warn!(self.logger, "Skipping duplicate archive member", "member" => &name);
                    continue;
                }
                flat
            };

            let target = self.extract_dir.join(file_name);
            let mut out = fs::File::create(&target)?;
            io::copy(&mut member.take(MAX_MEMBER_SIZE), &mut out)?;
            extracted.push(target);
        }

        Ok(extracted)
    }
}

impl ResultSink for FileSink {
    fn prepare(&self) -> Result<(), NgError> {
        fs::create_dir_all(&self.dir)?;
        if !self.clean_stale {
            return Ok(());
        }

        let artifacts: &[&str] = if self.shared_dir { &["part"] } else { &["json", "zip", "part"] };
        let removed = self.remove_matching(&self.dir, artifacts)? + self.remove_matching(&self.extract_dir, &["csv", "xlsx"])?;
        if removed > 0 {
            info!(self.logger, "Removed stale artifacts", "dir" => self.dir.display().to_string(), "count" => removed);
        }
        Ok(())
    }

    fn write_page(&self, ticket: &Ticket, page: u32, payload: &Payload) -> Result<PageArtifact, NgError> {
        match payload {
            Payload::Json(data) => {
                let path = self.dir.join(artifact_file_name(ticket, page, ArtifactKind::Data));
                let size_bytes = self.write_json(&path, data)?;
                self.remove_counterpart(ticket, page, ArtifactKind::Data);

                let record_count = data.get("result").and_then(Value::as_array).map(Vec::len);
                info!(
                    self.logger,
                    "Page artifact written",
                    "path" => path.display().to_string(),
                    "records" => record_count,
                    "bytes" => size_bytes
                );

                Ok(PageArtifact {
                    ticket: ticket.to_string(),
                    page,
                    kind: ArtifactKind::Data,
                    path,
                    size_bytes,
                    record_count,
                    declared_page: page_number(data.get("page")),
                    total_pages: page_number(data.get("totalPages")),
                    extracted: Vec::new(),
                })
            }
            Payload::Archive(bytes) => {
                let path = self.dir.join(artifact_file_name(ticket, page, ArtifactKind::Archive));
                let size_bytes = self.write_bytes(&path, bytes)?;
                self.remove_counterpart(ticket, page, ArtifactKind::Archive);

                let extracted = self.extract_archive(&path)?;
                if !self.keep_archives {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!(self.logger, "Failed to remove archive", "path" => path.display().to_string(), "error" => e.to_string());
                    }
                }
                info!(
                    self.logger,
                    "Archive extracted",
                    "archive" => path.display().to_string(),
                    "files" => extracted.len(),
                    "bytes" => size_bytes
                );

                Ok(PageArtifact {
                    ticket: ticket.to_string(),
                    page,
                    kind: ArtifactKind::Archive,
                    path,
                    size_bytes,
                    record_count: None,
                    declared_page: None,
                    total_pages: None,
                    extracted,
                })
            }
        }
    }

    fn write_absence(&self, ticket: &Ticket, page: u32, marker: &NoDataMarker) -> Result<PageArtifact, NgError> {
        let path = self.dir.join(artifact_file_name(ticket, page, ArtifactKind::NoData));
        let size_bytes = self.write_json(&path, marker)?;
        self.remove_counterpart(ticket, page, ArtifactKind::NoData);

        info!(
            self.logger,
            "No-data marker written",
            "path" => path.display().to_string(),
            "reason" => &marker.detection_reason
        );

        Ok(PageArtifact {
            ticket: ticket.to_string(),
            page,
            kind: ArtifactKind::NoData,
            path,
            size_bytes,
            record_count: Some(0),
            declared_page: None,
            total_pages: Some(marker.total_pages),
            extracted: Vec::new(),
        })
    }

    fn location(&self) -> &Path {
        &self.dir
    }
}
