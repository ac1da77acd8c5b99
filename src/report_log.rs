//! Append-only audit log (`.report.log`).

use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        })
    }
}

/// One non-fatal event of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub operation: String,
    pub endpoint: String,
    pub record: String,
    pub reason: String,
}

impl LogEntry {
    pub fn warn(operation: &str, endpoint: &str, record: &str, reason: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Warn,
            operation: operation.to_string(),
            endpoint: endpoint.to_string(),
            record: record.to_string(),
            reason: reason.into(),
        }
    }

    pub fn format_line(&self, timestamp: &str) -> String {
        format!(
            "{timestamp} {} op={} endpoint={} record={} reason={}",
            self.level,
            self.operation,
            if self.endpoint.is_empty() { "-" } else { &self.endpoint },
            if self.record.is_empty() { "-" } else { &self.record },
            self.reason.replace('\n', " "),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ReportLog {
    path: PathBuf,
}

impl ReportLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LogEntry) -> std::io::Result<()> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", entry.format_line(&timestamp))
    }

    /// Appends without failing the operation; a write error is only logged.
    pub fn record(&self, entry: &LogEntry) {
        if let Err(e) = self.append(entry) {
            warn!("cannot write {}: {e}", self.path.display());
        }
    }

    pub fn read_lines(&self) -> std::io::Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Ok(fs::read_to_string(&self.path)?
            .lines()
            .map(String::from)
            .collect())
    }
}
