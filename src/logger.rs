/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::logger
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Provide structured, append-only logging utilities shared by
    the core and its background workers.

  Security / Safety Notes:
    Entries record command lines and package names only; no
    environment or credential material is written.

  Dependencies:
    std::fs::File, std::sync::Mutex, sha2 for integrity hashing,
    chrono for RFC-3339 stamps.

  Operational Scope:
    Shared behind Arc by every worker to emit UTC stamped log
    entries and produce session hash digests.

  Revision History:
    2024-11-04 COD  Established logging module.
    2025-11-02 COD  Level threshold and retention pruning.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Append-only logging with UTC timestamps
    - Deterministic formatting for auditability
    - Graceful error propagation on I/O failures
============================================================*/

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::{DevmgrError, Result};

/// Structured log level for Dev-Mgr events.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Parse a configured level name; unknown names fall back to `Info`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Shared logger that emits append-only entries in Synavera format.
pub struct Logger {
    file: Option<Mutex<BufWriter<File>>>,
    path: Option<PathBuf>,
    verbose: bool,
    threshold: LogLevel,
}

impl Logger {
    /// Build a logger that writes to stderr and optionally to a file.
    pub fn new(path: Option<PathBuf>, verbose: bool, threshold: LogLevel) -> Result<Self> {
        let file = if let Some(ref file_path) = path {
            if let Some(parent) = file_path.parent() {
                fs::create_dir_all(parent).map_err(|err| {
                    DevmgrError::Filesystem(format!(
                        "Failed to create log directory {}: {err}",
                        parent.display()
                    ))
                })?;
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)
                .map_err(|err| {
                    DevmgrError::Filesystem(format!(
                        "Failed to open log file {}: {err}",
                        file_path.display()
                    ))
                })?;
            Some(Mutex::new(BufWriter::new(file)))
        } else {
            None
        };

        Ok(Self {
            file,
            path,
            verbose,
            threshold,
        })
    }

    /// Logger with no file sink that only surfaces warnings and errors.
    pub fn quiet() -> Self {
        Self {
            file: None,
            path: None,
            verbose: false,
            threshold: LogLevel::Warn,
        }
    }

    /// Emit a log entry with the given level, code, and message.
    pub fn log<S: AsRef<str>>(&self, level: LogLevel, code: &str, message: S) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let payload = format!(
            "{timestamp} [{}] [{}] {}",
            level.as_str(),
            code,
            message.as_ref()
        );

        if self.verbose || level >= LogLevel::Warn {
            eprintln!("{payload}");
        }

        if level < self.threshold {
            return;
        }

        if let Some(file) = &self.file {
            if let Ok(mut guard) = file.lock() {
                if writeln!(guard, "{payload}").is_err() {
                    eprintln!(
                        "{} [{}] [{}] {}",
                        timestamp,
                        LogLevel::Error.as_str(),
                        "LOGGER",
                        "Failed to write to log file"
                    );
                }
                if guard.flush().is_err() {
                    eprintln!(
                        "{} [{}] [{}] {}",
                        timestamp,
                        LogLevel::Warn.as_str(),
                        "LOGGER",
                        "Failed to flush log writer"
                    );
                }
            }
        }
    }

    pub fn info<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Info, code, message);
    }

    pub fn warn<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Warn, code, message);
    }

    pub fn error<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Error, code, message);
    }

    pub fn debug<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Debug, code, message);
    }

    /// Return the path backing this logger, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Compute and persist SHA-256 digest of the log file.
    pub fn finalize(&self) -> Result<()> {
        if let Some(path) = self.path() {
            let data = fs::read(path).map_err(|err| {
                DevmgrError::Filesystem(format!(
                    "Failed to read log for hashing {}: {err}",
                    path.display()
                ))
            })?;
            let digest = Sha256::digest(&data);
            let hash_path = hash_path_for(path);
            let mut file = File::create(&hash_path).map_err(|err| {
                DevmgrError::Filesystem(format!(
                    "Failed to create hash file {}: {err}",
                    hash_path.display()
                ))
            })?;
            writeln!(
                file,
                "{:x}  {}",
                digest,
                path.file_name().unwrap_or_default().to_string_lossy()
            )
            .map_err(|err| {
                DevmgrError::Filesystem(format!(
                    "Failed to write hash file {}: {err}",
                    hash_path.display()
                ))
            })?;
        }
        Ok(())
    }
}

fn hash_path_for(path: &Path) -> PathBuf {
    let mut hash_os = path.as_os_str().to_os_string();
    hash_os.push(".hash");
    PathBuf::from(hash_os)
}

/// Remove session logs (and their digests) older than `retention_days`.
///
/// A retention of zero keeps everything. Returns the number of logs removed.
pub fn prune_logs(dir: &Path, retention_days: u64) -> usize {
    if retention_days == 0 {
        return 0;
    }
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(60 * 60 * 24 * retention_days))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
        if meta.is_file() && modified < cutoff && fs::remove_file(&path).is_ok() {
            let _ = fs::remove_file(hash_path_for(&path));
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse_and_order() {
        assert_eq!(LogLevel::parse("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("nonsense"), LogLevel::Info);
        assert!(LogLevel::Error > LogLevel::Info);
    }

    #[test]
    fn test_threshold_filters_file_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.log");
        let logger = Logger::new(Some(path.clone()), false, LogLevel::Info).expect("logger");
        logger.debug("SPAWN", "hidden");
        logger.info("INIT", "visible");
        logger.finalize().expect("finalize");

        let contents = fs::read_to_string(&path).expect("read log");
        assert!(contents.contains("[INFO] [INIT] visible"));
        assert!(!contents.contains("hidden"));
        assert!(dir.path().join("session.log.hash").exists());
    }

    #[test]
    fn test_prune_keeps_fresh_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("fresh.log"), "x").expect("write");
        assert_eq!(prune_logs(dir.path(), 7), 0);
        assert_eq!(prune_logs(dir.path(), 0), 0);
        assert!(dir.path().join("fresh.log").exists());
    }
}
