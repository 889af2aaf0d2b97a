/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::error
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise Dev-Mgr error types and the boolean/message
    outcome shape handed to the presentation shell.

  Security / Safety Notes:
    Error contexts carry command lines and package names only;
    stderr excerpts are trimmed before they are surfaced.

  Dependencies:
    thiserror for ergonomic error definitions, serde for the
    serializable operation outcome.

  Operational Scope:
    Used across modules to propagate recoverable failures and
    consolidate exit codes for the binary entry point.

  Revision History:
    2024-11-04 COD  Established shared error definitions.
    2025-11-02 COD  Added detection, bootstrap and state domains.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - No silent failure paths
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::process::ExitCode;

use serde::Serialize;
use thiserror::Error;

use crate::builder::BuildStage;

/// Result alias for Dev-Mgr operations.
pub type Result<T> = std::result::Result<T, DevmgrError>;

/// Environment capabilities that could not be established.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DetectionError {
    #[error("No supported package manager found")]
    NoPackageManager,
    #[error("No privilege escalation method found")]
    NoPrivilegeMethod,
}

/// Enumerates high-level error domains surfaced by Dev-Mgr.
#[derive(Debug, Error)]
pub enum DevmgrError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error("Required command `{command}` not found in PATH")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Failed to install dependency `{dependency}` for {helper}: {reason}")]
    DependencyInstall {
        helper: String,
        dependency: String,
        reason: String,
    },
    #[error("Bootstrap of {helper} failed at the {stage} stage: {source}")]
    Bootstrap {
        helper: String,
        stage: BuildStage,
        #[source]
        source: Box<DevmgrError>,
    },
    #[error("{helper} build reported success but the binary is not on PATH")]
    HelperNotDetected { helper: String },
    #[error("Command `{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },
    #[error("Invalid state: {0}")]
    State(String),
    #[error("Unknown AUR helper: {0}")]
    UnknownHelper(String),
    #[error("Unknown pack: {0}")]
    UnknownPack(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DevmgrError {
    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            DevmgrError::CommandMissing { .. } => ExitCode::from(10),
            DevmgrError::CommandFailure { .. } | DevmgrError::Timeout { .. } => ExitCode::from(11),
            DevmgrError::Detection(_) => ExitCode::from(12),
            DevmgrError::DependencyInstall { .. }
            | DevmgrError::HelperNotDetected { .. }
            | DevmgrError::Bootstrap { .. } => ExitCode::from(13),
            DevmgrError::State(_) | DevmgrError::UnknownHelper(_) | DevmgrError::UnknownPack(_) => {
                ExitCode::from(14)
            }
            DevmgrError::Cancelled => ExitCode::from(15),
            DevmgrError::Config(_) => ExitCode::from(20),
            DevmgrError::Serialization(_) => ExitCode::from(31),
            DevmgrError::Filesystem(_) => ExitCode::from(40),
            DevmgrError::Runtime(_) => ExitCode::from(50),
            DevmgrError::Io(_) => ExitCode::from(41),
        }
    }

    /// True when the failure came from the caller asking for an AUR action in the wrong state.
    pub fn is_state_error(&self) -> bool {
        matches!(self, DevmgrError::State(_))
    }
}

/// Success flag plus human-readable message returned by every mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl From<Result<String>> for OperationResult {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(message) => OperationResult::ok(message),
            Err(err) => OperationResult::failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_from_error_keeps_message() {
        let result: Result<String> = Err(DevmgrError::State("No AUR helper installed".into()));
        let outcome = OperationResult::from(result);
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Invalid state: No AUR helper installed");
    }

    #[test]
    fn test_detection_error_converts() {
        let err: DevmgrError = DetectionError::NoPrivilegeMethod.into();
        assert_eq!(err.to_string(), "No privilege escalation method found");
        assert!(!err.is_state_error());
    }
}
