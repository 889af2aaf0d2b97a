/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::environment
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Discover the host's package-manager backend, privilege
    escalation method, Arch lineage and active AUR helper.

  Security / Safety Notes:
    Reads the release-information file only; detection never
    executes the tools it finds, it only resolves them on PATH.

  Dependencies:
    serde for snapshot serialization.

  Operational Scope:
    Produces the immutable environment snapshot that every
    other component is configured from.

  Revision History:
    2025-11-02 COD  Authored environment detection.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Fixed priority orders for deterministic tie-breaks
    - Detection failures are values, not panics
============================================================*/

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::aur::SUPPORTED_HELPERS;
use crate::error::DetectionError;
use crate::runner::CommandRunner;

/// Standard location of the release-information file.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Host distribution metadata from the release-information file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistroInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub id_like: Vec<String>,
}

impl DistroInfo {
    pub fn unknown() -> Self {
        Self {
            id: "unknown".into(),
            name: "Unknown".into(),
            version: String::new(),
            id_like: Vec::new(),
        }
    }

    /// Parse `KEY=value` lines; quotes around values are stripped.
    pub fn parse(contents: &str) -> Self {
        let mut info = Self::unknown();
        for line in contents.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key.trim() {
                "ID" => info.id = value.to_string(),
                "NAME" => info.name = value.to_string(),
                "VERSION_ID" => info.version = value.to_string(),
                "ID_LIKE" => {
                    info.id_like = value.split_whitespace().map(str::to_string).collect();
                }
                _ => {}
            }
        }
        info
    }

    /// Read and parse `path`; a missing or unreadable file yields `unknown()`.
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .map(|contents| Self::parse(&contents))
            .unwrap_or_else(|_| Self::unknown())
    }

    /// True when the id, name or id-like chain mentions "arch".
    pub fn names_arch(&self) -> bool {
        std::iter::once(&self.id)
            .chain(std::iter::once(&self.name))
            .chain(self.id_like.iter())
            .any(|value| value.to_ascii_lowercase().contains("arch"))
    }
}

/// Supported native package managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Apt,
    Yum,
    Dnf,
    Pacman,
    Zypper,
}

impl BackendKind {
    /// Detection priority: the first executable wins.
    pub const PRIORITY: [BackendKind; 5] = [
        BackendKind::Apt,
        BackendKind::Yum,
        BackendKind::Dnf,
        BackendKind::Pacman,
        BackendKind::Zypper,
    ];

    /// Binary probed on PATH during detection.
    pub fn program(self) -> &'static str {
        match self {
            BackendKind::Apt => "apt",
            BackendKind::Yum => "yum",
            BackendKind::Dnf => "dnf",
            BackendKind::Pacman => "pacman",
            BackendKind::Zypper => "zypper",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            BackendKind::Apt => "APT",
            BackendKind::Yum => "YUM",
            BackendKind::Dnf => "DNF",
            BackendKind::Pacman => "Pacman",
            BackendKind::Zypper => "Zypper",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Mechanisms for running a command with elevated rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeMethod {
    Pkexec,
    Gksudo,
    Kdesudo,
    Sudo,
}

impl PrivilegeMethod {
    pub const PRIORITY: [PrivilegeMethod; 4] = [
        PrivilegeMethod::Pkexec,
        PrivilegeMethod::Gksudo,
        PrivilegeMethod::Kdesudo,
        PrivilegeMethod::Sudo,
    ];

    pub fn program(self) -> &'static str {
        match self {
            PrivilegeMethod::Pkexec => "pkexec",
            PrivilegeMethod::Gksudo => "gksudo",
            PrivilegeMethod::Kdesudo => "kdesudo",
            PrivilegeMethod::Sudo => "sudo",
        }
    }

    /// Tokens prepended verbatim to a privileged argv.
    pub fn prefix(self) -> &'static [&'static str] {
        match self {
            PrivilegeMethod::Pkexec => &["pkexec"],
            PrivilegeMethod::Gksudo => &["gksudo", "--"],
            PrivilegeMethod::Kdesudo => &["kdesudo", "--"],
            PrivilegeMethod::Sudo => &["sudo"],
        }
    }
}

impl fmt::Display for PrivilegeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Which AUR helper, if any, the core delegates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "helper", rename_all = "snake_case")]
pub enum HelperState {
    /// Host is not Arch-based; AUR operations are unavailable.
    NotApplicable,
    NoHelper,
    HelperActive(String),
}

impl HelperState {
    pub fn active_helper(&self) -> Option<&str> {
        match self {
            HelperState::HelperActive(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for HelperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HelperState::NotApplicable => f.write_str("not applicable"),
            HelperState::NoHelper => f.write_str("no helper"),
            HelperState::HelperActive(name) => write!(f, "{name}"),
        }
    }
}

/// Immutable result of one detection pass.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentSnapshot {
    pub distro: DistroInfo,
    #[serde(serialize_with = "serialize_detection")]
    pub backend: Result<BackendKind, DetectionError>,
    #[serde(serialize_with = "serialize_detection")]
    pub privilege: Result<PrivilegeMethod, DetectionError>,
    pub arch_based: bool,
    pub helper: HelperState,
}

fn serialize_detection<T, S>(
    value: &Result<T, DetectionError>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    T: Serialize,
    S: serde::Serializer,
{
    match value {
        Ok(found) => found.serialize(serializer),
        Err(_) => serializer.serialize_none(),
    }
}

/// Probes the host through a [`CommandRunner`].
#[derive(Clone)]
pub struct EnvironmentDetector {
    runner: Arc<dyn CommandRunner>,
    os_release: PathBuf,
}

impl EnvironmentDetector {
    pub fn new(runner: Arc<dyn CommandRunner>, os_release: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            os_release: os_release.into(),
        }
    }

    pub fn distro(&self) -> DistroInfo {
        DistroInfo::load(&self.os_release)
    }

    pub fn detect_backend(&self) -> Result<BackendKind, DetectionError> {
        BackendKind::PRIORITY
            .into_iter()
            .find(|kind| self.runner.which(kind.program()))
            .ok_or(DetectionError::NoPackageManager)
    }

    pub fn detect_privilege(&self) -> Result<PrivilegeMethod, DetectionError> {
        PrivilegeMethod::PRIORITY
            .into_iter()
            .find(|method| self.runner.which(method.program()))
            .ok_or(DetectionError::NoPrivilegeMethod)
    }

    /// Release metadata names Arch, or pacman is executable.
    ///
    /// id-like chains differ between derivatives, so pacman presence is the
    /// fallback that catches the rest.
    pub fn is_arch_based(&self) -> bool {
        self.distro().names_arch() || self.runner.which("pacman")
    }

    pub fn helper_executable(&self, name: &str) -> bool {
        self.runner.which(name)
    }

    pub fn detect_active_helper(&self) -> HelperState {
        if !self.is_arch_based() {
            return HelperState::NotApplicable;
        }
        self.first_helper()
    }

    fn first_helper(&self) -> HelperState {
        SUPPORTED_HELPERS
            .iter()
            .find(|spec| self.runner.which(spec.name))
            .map(|spec| HelperState::HelperActive(spec.name.to_string()))
            .unwrap_or(HelperState::NoHelper)
    }

    /// Run every probe once and freeze the results.
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        let distro = self.distro();
        let arch_based = distro.names_arch() || self.runner.which("pacman");
        let helper = if arch_based {
            self.first_helper()
        } else {
            HelperState::NotApplicable
        };
        EnvironmentSnapshot {
            distro,
            backend: self.detect_backend(),
            privilege: self.detect_privilege(),
            arch_based,
            helper,
        }
    }
}
