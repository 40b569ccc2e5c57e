#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging shared by the propcast crates.
//!
//! Records go either to an append-only file or to stderr. Stdout is left
//! alone so command-line tools can keep it for machine-readable output.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Log severity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Degraded but recoverable conditions.
    Warn,
    /// Failures.
    Error,
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Module emitting the log.
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Dotted event name or human-readable message.
    pub message: String,
    /// Arbitrary JSON payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attaches the fields of a JSON object as metadata. Non-object values
    /// are stored under `value`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        match metadata {
            serde_json::Value::Object(map) => self.metadata = map,
            serde_json::Value::Null => {}
            other => {
                self.metadata.insert("value".into(), other);
            }
        }
        self
    }
}

#[derive(Debug)]
enum LogSink {
    File { path: PathBuf, file: File },
    Stderr,
}

/// Thread-safe JSON logger with append-only semantics.
#[derive(Debug)]
pub struct JsonLogger {
    sink: Mutex<LogSink>,
    min_level: LogLevel,
}

impl JsonLogger {
    /// Creates or opens a file logger at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            sink: Mutex::new(LogSink::File { path, file }),
            min_level: LogLevel::Debug,
        })
    }

    /// Creates a logger writing JSON lines to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            sink: Mutex::new(LogSink::Stderr),
            min_level: LogLevel::Debug,
        }
    }

    /// Drops records below the given level.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Writes a log record as a JSON line.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        if record.level < self.min_level {
            return Ok(());
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut sink = self.sink.lock();
        match &mut *sink {
            LogSink::File { file, .. } => {
                file.write_all(&line)?;
                file.flush()?;
            }
            LogSink::Stderr => {
                let mut stderr = io::stderr().lock();
                stderr.write_all(&line)?;
                stderr.flush()?;
            }
        }
        Ok(())
    }

    /// Returns the file path when logging to a file.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.sink.lock() {
            LogSink::File { path, .. } => Some(path.clone()),
            LogSink::Stderr => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_json_lines() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("logs/test.log")).unwrap();
        logger
            .log(&LogRecord::new("pricing", LogLevel::Info, "hello"))
            .unwrap();
        let content = fs::read_to_string(logger.path().unwrap()).unwrap();
        assert!(content.contains("\"message\":\"hello\""));
        assert!(content.contains("\"level\":\"INFO\""));
    }

    #[test]
    fn filters_below_min_level() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("filtered.log"))
            .unwrap()
            .with_min_level(LogLevel::Warn);
        logger
            .log(&LogRecord::new("pricing", LogLevel::Debug, "quiet"))
            .unwrap();
        logger
            .log(
                &LogRecord::new("pricing", LogLevel::Warn, "loud")
                    .with_metadata(json!({ "attempt": 1 })),
            )
            .unwrap();
        let content = fs::read_to_string(logger.path().unwrap()).unwrap();
        assert!(!content.contains("quiet"));
        assert!(content.contains("\"attempt\":1"));
    }

    #[test]
    fn stderr_logger_has_no_path() {
        let logger = JsonLogger::stderr();
        assert!(logger.path().is_none());
        logger
            .log(&LogRecord::new("pricing", LogLevel::Debug, "to stderr"))
            .unwrap();
    }
}
