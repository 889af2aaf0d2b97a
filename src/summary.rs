/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::summary
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Read-only overview of the host: distribution, detected
    tooling and package counts.

  Security / Safety Notes:
    Built from unprivileged queries only.

  Dependencies:
    serde for JSON output.

  Operational Scope:
    Shown by `devmgr info` and available to any shell.

  Revision History:
    2025-11-02 COD  Authored system summary.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Query failures degrade to zero counts
============================================================*/

use std::fmt;

use serde::Serialize;

use crate::aur::AurHelperManager;
use crate::backend::PackageBackend;
use crate::control::CancelToken;
use crate::environment::{
    BackendKind, DistroInfo, EnvironmentSnapshot, HelperState, PrivilegeMethod,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSummary {
    pub distro: DistroInfo,
    pub backend: Option<BackendKind>,
    pub privilege: Option<PrivilegeMethod>,
    pub arch_based: bool,
    pub helper: HelperState,
    pub installed_packages: usize,
    pub available_updates: usize,
    pub foreign_packages: usize,
}

impl SystemSummary {
    pub async fn collect(
        snapshot: &EnvironmentSnapshot,
        backend: Option<&PackageBackend>,
        aur: &AurHelperManager,
        cancel: &CancelToken,
    ) -> Self {
        let (installed_packages, available_updates) = match backend {
            Some(backend) => (
                backend.installed_count(cancel).await,
                backend.available_updates(cancel).await,
            ),
            None => (0, 0),
        };
        let foreign_packages = if snapshot.arch_based {
            aur.installed_foreign_packages(cancel)
                .await
                .map(|packages| packages.len())
                .unwrap_or(0)
        } else {
            0
        };

        Self {
            distro: snapshot.distro.clone(),
            backend: snapshot.backend.ok(),
            privilege: snapshot.privilege.ok(),
            arch_based: snapshot.arch_based,
            helper: aur.state(),
            installed_packages,
            available_updates,
            foreign_packages,
        }
    }
}

fn or_none<T: fmt::Display>(value: Option<T>) -> String {
    value
        .map(|found| found.to_string())
        .unwrap_or_else(|| "none detected".to_string())
}

impl fmt::Display for SystemSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = if self.distro.version.is_empty() {
            String::new()
        } else {
            format!(" {}", self.distro.version)
        };
        writeln!(f, "Distribution:      {}{version}", self.distro.name)?;
        writeln!(f, "Package manager:   {}", or_none(self.backend))?;
        writeln!(f, "Privilege method:  {}", or_none(self.privilege))?;
        writeln!(f, "AUR helper:        {}", self.helper)?;
        writeln!(f, "Installed:         {}", self.installed_packages)?;
        writeln!(f, "Updates:           {}", self.available_updates)?;
        write!(f, "AUR packages:      {}", self.foreign_packages)
    }
}
