/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::config
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Load Dev-Mgr configuration from operator-defined sources,
    providing typed accessors and sensible defaults.

  Security / Safety Notes:
    Configuration paths are user-owned. The loader refuses to
    parse world-writable files.

  Dependencies:
    dirs for platform-specific config lookup, serde and toml
    for parsing.

  Operational Scope:
    Consumed at startup to tune detection inputs, logging,
    AUR search behaviour and the development pack catalog.

  Revision History:
    2024-11-04 COD  Authored configuration subsystem.
    2025-11-02 COD  Logging, AUR search and pack sections.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit defaults with documented precedence
    - Validation of untrusted configuration sources
    - Deterministic error reporting with context
============================================================*/

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dirs::config_dir;
use serde::Deserialize;

use crate::aur::AurOptions;
use crate::environment::OS_RELEASE_PATH;
use crate::error::{DevmgrError, Result};
use crate::logger::LogLevel;
use crate::packs::{Pack, PackCatalog};
use crate::search::DEFAULT_REPOSITORY_MARKER;

/// Top-level configuration for Dev-Mgr.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DevmgrConfig {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub aur: AurConfig,
    #[serde(default)]
    pub packs: Vec<Pack>,
}

impl DevmgrConfig {
    /// Load configuration, applying defaults and overriding with file contents if present.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::read(path),
            Some(path) => Err(DevmgrError::Config(format!(
                "Configuration file {} does not exist",
                path.display()
            ))),
            None => match default_config_path() {
                Some(default_path) if default_path.exists() => Self::read(&default_path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self> {
        ensure_secure_permissions(path)?;
        let contents = fs::read_to_string(path).map_err(|err| {
            DevmgrError::Filesystem(format!(
                "Failed to read configuration {}: {err}",
                path.display()
            ))
        })?;
        Self::parse(&contents).map_err(|err| match err {
            DevmgrError::Config(reason) => DevmgrError::Config(format!(
                "Failed to parse configuration {}: {reason}",
                path.display()
            )),
            other => other,
        })
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| DevmgrError::Config(err.to_string()))
    }

    pub fn os_release_path(&self) -> PathBuf {
        PathBuf::from(&self.core.os_release_path)
    }

    /// Log directory defined by operator, or the per-user data directory.
    pub fn log_dir(&self) -> PathBuf {
        self.core
            .log_directory
            .as_ref()
            .map(|p| PathBuf::from(p.as_str()))
            .unwrap_or_else(default_log_dir)
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.logging.level)
    }

    pub fn aur_options(&self) -> AurOptions {
        AurOptions {
            search_timeout: Duration::from_secs(self.aur.search_timeout_secs.max(1)),
            repository_marker: self.aur.repository_marker.clone(),
        }
    }

    /// Built-in packs merged with `[[packs]]` entries.
    pub fn pack_catalog(&self) -> PackCatalog {
        PackCatalog::builtin().merge(self.packs.iter().cloned())
    }
}

/// Configuration for core runtime.
#[derive(Debug, Deserialize, Clone)]
pub struct CoreConfig {
    #[serde(default = "CoreConfig::default_os_release_path")]
    pub os_release_path: String,
    #[serde(default)]
    pub log_directory: Option<String>,
}

impl CoreConfig {
    fn default_os_release_path() -> String {
        OS_RELEASE_PATH.to_string()
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            os_release_path: Self::default_os_release_path(),
            log_directory: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// Days to keep session logs; 0 keeps everything.
    #[serde(default = "LoggingConfig::default_retention_days")]
    pub retention_days: u64,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_retention_days() -> u64 {
        30
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            retention_days: Self::default_retention_days(),
        }
    }
}

/// Configuration options for AUR interactions.
#[derive(Debug, Deserialize, Clone)]
pub struct AurConfig {
    /// Helper offered by `helper install` when none is named.
    #[serde(default = "AurConfig::default_helper")]
    pub default_helper: String,
    #[serde(default = "AurConfig::default_search_timeout")]
    pub search_timeout_secs: u64,
    #[serde(default = "AurConfig::default_repository_marker")]
    pub repository_marker: String,
}

impl AurConfig {
    fn default_helper() -> String {
        "yay".to_string()
    }

    fn default_search_timeout() -> u64 {
        30
    }

    fn default_repository_marker() -> String {
        DEFAULT_REPOSITORY_MARKER.to_string()
    }
}

impl Default for AurConfig {
    fn default() -> Self {
        Self {
            default_helper: Self::default_helper(),
            search_timeout_secs: Self::default_search_timeout(),
            repository_marker: Self::default_repository_marker(),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("devmgr").join("config.toml"))
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into())))
        .join("devmgr")
        .join("logs")
}

fn ensure_secure_permissions(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|err| {
        DevmgrError::Filesystem(format!(
            "Failed to inspect permissions for {}: {err}",
            path.display()
        ))
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if metadata.mode() & 0o002 != 0 {
            return Err(DevmgrError::Config(format!(
                "Configuration file {} must not be world-writable",
                path.display()
            )));
        }
    }
    if !metadata.is_file() {
        return Err(DevmgrError::Config(format!(
            "Configuration path {} is not a regular file",
            path.display()
        )));
    }
    Ok(())
}
