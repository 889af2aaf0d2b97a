/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::packs
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Curated development packs: named, ordered package lists
    installed or removed as a single batch.

  Security / Safety Notes:
    Status checks use unprivileged queries only.

  Dependencies:
    serde for configuration-defined packs.

  Operational Scope:
    Built-in catalog extended by [[packs]] entries from the
    configuration file.

  Revision History:
    2025-11-02 COD  Authored pack catalog.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic catalog order
    - User definitions override built-ins by name
============================================================*/

use serde::{Deserialize, Serialize};

use crate::backend::PackageBackend;
use crate::batch::{BatchAction, BatchJob};
use crate::control::CancelToken;
use crate::error::{DevmgrError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub packages: Vec<String>,
}

impl Pack {
    fn builtin(name: &str, description: &str, packages: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            packages: packages.iter().map(|pkg| pkg.to_string()).collect(),
        }
    }

    pub fn job(&self, action: BatchAction) -> BatchJob {
        BatchJob::new(action, self.packages.iter().cloned())
    }
}

/// Ordered set of packs available to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackCatalog {
    packs: Vec<Pack>,
}

impl Default for PackCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PackCatalog {
    pub fn builtin() -> Self {
        Self {
            packs: vec![
                Pack::builtin(
                    "Web Development",
                    "Essential tools for building modern web applications",
                    &["nodejs", "git", "nginx", "redis", "curl"],
                ),
                Pack::builtin(
                    "Python Development",
                    "Complete Python development environment with essential tools",
                    &["python3", "python3-pip", "python3-venv", "git", "vim"],
                ),
                Pack::builtin(
                    "DevOps Essentials",
                    "Tools for containerization, automation, and deployment",
                    &["docker", "git", "curl", "wget", "htop", "tmux"],
                ),
                Pack::builtin(
                    "Database Stack",
                    "Popular database systems for development and testing",
                    &["postgresql", "redis", "mysql-server"],
                ),
                Pack::builtin(
                    "System Tools",
                    "Essential system utilities for Linux development",
                    &["htop", "tmux", "vim", "curl", "wget", "git"],
                ),
                Pack::builtin(
                    "Full Stack",
                    "Comprehensive set for full-stack web development",
                    &["nodejs", "python3", "git", "docker", "postgresql", "redis", "nginx"],
                ),
            ],
        }
    }

    /// Add user packs; one sharing a name with an existing pack replaces it in place.
    pub fn merge(mut self, user: impl IntoIterator<Item = Pack>) -> Self {
        for pack in user {
            match self
                .packs
                .iter_mut()
                .find(|existing| existing.name.eq_ignore_ascii_case(&pack.name))
            {
                Some(existing) => *existing = pack,
                None => self.packs.push(pack),
            }
        }
        self
    }

    pub fn packs(&self) -> &[Pack] {
        &self.packs
    }

    /// Case-insensitive lookup by name.
    pub fn get(&self, name: &str) -> Result<&Pack> {
        self.packs
            .iter()
            .find(|pack| pack.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| DevmgrError::UnknownPack(name.to_string()))
    }
}

/// Installed and missing members of a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackStatus {
    pub name: String,
    pub installed: Vec<String>,
    pub missing: Vec<String>,
}

impl PackStatus {
    pub async fn probe(backend: &PackageBackend, pack: &Pack, cancel: &CancelToken) -> Self {
        let mut installed = Vec::new();
        let mut missing = Vec::new();
        for package in &pack.packages {
            if backend.is_installed(package, cancel).await {
                installed.push(package.clone());
            } else {
                missing.push(package.clone());
            }
        }
        Self {
            name: pack.name.clone(),
            installed,
            missing,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn label(&self) -> String {
        if self.is_complete() {
            "Installed".to_string()
        } else if self.installed.is_empty() {
            "Not installed".to_string()
        } else {
            format!("Partial ({} remaining)", self.missing.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::MutationLock;
    use crate::environment::{BackendKind, PrivilegeMethod};
    use crate::logger::Logger;
    use crate::runner::{Reply, ScriptedRunner};
    use std::sync::Arc;

    #[test]
    fn test_builtin_catalog_order() {
        let catalog = PackCatalog::builtin();
        let names: Vec<&str> = catalog.packs().iter().map(|pack| pack.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "Web Development",
                "Python Development",
                "DevOps Essentials",
                "Database Stack",
                "System Tools",
                "Full Stack"
            ]
        );
        assert_eq!(catalog.get("database stack").expect("pack").packages.len(), 3);
    }

    #[test]
    fn test_user_pack_replaces_builtin() {
        let catalog = PackCatalog::builtin().merge([
            Pack {
                name: "System Tools".into(),
                description: String::new(),
                packages: vec!["btop".into()],
            },
            Pack {
                name: "Rust".into(),
                description: "Rust toolchain".into(),
                packages: vec!["rustup".into()],
            },
        ]);
        assert_eq!(catalog.packs().len(), 7);
        assert_eq!(catalog.get("System Tools").expect("pack").packages, ["btop"]);
        assert_eq!(catalog.packs()[4].name, "System Tools");
        assert!(matches!(catalog.get("Gaming"), Err(DevmgrError::UnknownPack(_))));
    }

    #[tokio::test]
    async fn test_status_splits_members() {
        let runner = Arc::new(ScriptedRunner::with_programs(&["apt", "sudo"]));
        runner
            .on(&["dpkg", "-s"], Reply::exit(1))
            .on(&["dpkg", "-s", "git"], Reply::exit(0));
        let backend = PackageBackend::new(
            BackendKind::Apt,
            Some(PrivilegeMethod::Sudo),
            runner,
            MutationLock::new(),
            Arc::new(Logger::quiet()),
        );
        let catalog = PackCatalog::builtin();
        let pack = catalog.get("Database Stack").expect("pack");
        let status = PackStatus::probe(&backend, pack, &CancelToken::new()).await;
        assert!(status.installed.is_empty());
        assert_eq!(status.label(), "Not installed");

        let web = catalog.get("Web Development").expect("pack");
        let status = PackStatus::probe(&backend, web, &CancelToken::new()).await;
        assert_eq!(status.installed, ["git"]);
        assert_eq!(status.label(), "Partial (4 remaining)");
    }
}
