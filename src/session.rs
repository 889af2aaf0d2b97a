/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::session
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Facade handed to presentation shells: holds the current
    environment snapshot and launches background workers.

  Security / Safety Notes:
    Detection failures are kept as values; mutating requests
    against a host without a backend or privilege method are
    refused before any worker starts. Queries only need a
    backend.

  Dependencies:
    Every core module; no direct third-party calls.

  Operational Scope:
    One session per process. Re-detection happens only when
    the shell calls refresh().

  Revision History:
    2025-11-02 COD  Authored session facade.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Immutable snapshots, explicit refresh
    - Shells observe the core, never the reverse
============================================================*/

use std::path::PathBuf;
use std::sync::Arc;

use crate::aur::{helper_spec, AurHelperManager, AurOptions};
use crate::backend::{Mutation, PackageBackend};
use crate::batch::{BatchAction, BatchJob, BatchResult};
use crate::builder::AurSourceBuilder;
use crate::config::DevmgrConfig;
use crate::control::{CancelToken, MutationLock};
use crate::environment::{
    DistroInfo, EnvironmentDetector, EnvironmentSnapshot, HelperState, OS_RELEASE_PATH,
};
use crate::error::{DetectionError, DevmgrError, Result};
use crate::logger::Logger;
use crate::packs::{PackCatalog, PackStatus};
use crate::runner::CommandRunner;
use crate::search::PackageRecord;
use crate::summary::SystemSummary;
use crate::worker::{spawn_batch, spawn_bootstrap, spawn_search, spawn_worker, WorkerHandle};

/// Inputs a session is assembled from.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub os_release: PathBuf,
    pub aur: AurOptions,
    pub packs: PackCatalog,
    /// Parent directory for helper build workspaces; system temp dir when unset.
    pub build_root: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            os_release: PathBuf::from(OS_RELEASE_PATH),
            aur: AurOptions::default(),
            packs: PackCatalog::builtin(),
            build_root: None,
        }
    }
}

impl From<&DevmgrConfig> for SessionOptions {
    fn from(config: &DevmgrConfig) -> Self {
        Self {
            os_release: config.os_release_path(),
            aur: config.aur_options(),
            packs: config.pack_catalog(),
            build_root: None,
        }
    }
}

pub struct Session {
    runner: Arc<dyn CommandRunner>,
    logger: Arc<Logger>,
    lock: MutationLock,
    options: SessionOptions,
    snapshot: EnvironmentSnapshot,
    backend: std::result::Result<PackageBackend, DetectionError>,
    aur: AurHelperManager,
}

impl Session {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        logger: Arc<Logger>,
        options: SessionOptions,
    ) -> Self {
        let lock = MutationLock::new();
        let (snapshot, backend, aur) = assemble(&runner, &logger, &lock, &options);
        Self {
            runner,
            logger,
            lock,
            options,
            snapshot,
            backend,
            aur,
        }
    }

    /// Re-run detection and replace the snapshot.
    ///
    /// Handles obtained before the refresh keep their previous view.
    pub fn refresh(&mut self) -> &EnvironmentSnapshot {
        let (snapshot, backend, aur) =
            assemble(&self.runner, &self.logger, &self.lock, &self.options);
        self.snapshot = snapshot;
        self.backend = backend;
        self.aur = aur;
        &self.snapshot
    }

    pub fn snapshot(&self) -> &EnvironmentSnapshot {
        &self.snapshot
    }

    pub fn distro(&self) -> &DistroInfo {
        &self.snapshot.distro
    }

    /// Live helper state; follows installs and removals made through this session.
    pub fn helper_state(&self) -> HelperState {
        self.aur.state()
    }

    /// Detected backend; usable for queries even without a privilege method.
    pub fn backend(&self) -> Result<&PackageBackend> {
        self.backend
            .as_ref()
            .map_err(|err| DevmgrError::Detection(*err))
    }

    fn mutating_backend(&self) -> Result<&PackageBackend> {
        let backend = self.backend()?;
        backend.privilege()?;
        Ok(backend)
    }

    pub fn aur(&self) -> &AurHelperManager {
        &self.aur
    }

    pub fn packs(&self) -> &PackCatalog {
        &self.options.packs
    }

    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// Install or remove native packages, skipping those already in the target state.
    pub fn spawn_batch(
        &self,
        action: BatchAction,
        packages: Vec<String>,
    ) -> Result<WorkerHandle<BatchResult>> {
        let backend = self.mutating_backend()?.clone();
        self.logger.info(
            "BATCH",
            format!("{action:?} {} package(s): {}", packages.len(), packages.join(", ")),
        );
        Ok(spawn_batch(backend, BatchJob::new(action, packages)))
    }

    /// Run a single privileged action (upgrade, cleanup, database refresh).
    pub fn spawn_mutation(
        &self,
        mutation: Mutation,
        package: Option<String>,
    ) -> Result<WorkerHandle<String>> {
        let backend = self.mutating_backend()?.clone();
        let package = match (mutation, package) {
            (Mutation::RefreshDatabases, _) => String::new(),
            (_, Some(package)) if !package.trim().is_empty() => package,
            (_, _) => {
                return Err(DevmgrError::State(format!(
                    "Cannot {} without a package name",
                    mutation.verb()
                )))
            }
        };
        Ok(spawn_worker(move |reporter, cancel| async move {
            let label = if package.is_empty() {
                mutation.verb().to_string()
            } else {
                format!("{} {package}", mutation.verb())
            };
            reporter.progress(0, label.clone());
            backend.mutate(mutation, &package, &cancel).await?;
            reporter.progress(100, "Done");
            Ok(format!("Finished: {label}"))
        }))
    }

    pub fn spawn_pack(&self, name: &str, action: BatchAction) -> Result<WorkerHandle<BatchResult>> {
        let pack = self.options.packs.get(name)?;
        let backend = self.mutating_backend()?.clone();
        self.logger
            .info("PACK", format!("{action:?} pack '{}'", pack.name));
        Ok(spawn_batch(backend, pack.job(action)))
    }

    pub async fn pack_status(&self, name: &str, cancel: &CancelToken) -> Result<PackStatus> {
        let pack = self.options.packs.get(name)?;
        Ok(PackStatus::probe(self.backend()?, pack, cancel).await)
    }

    /// Install or remove AUR packages through the active helper.
    pub fn spawn_aur_batch(
        &self,
        action: BatchAction,
        packages: Vec<String>,
    ) -> Result<WorkerHandle<BatchResult>> {
        self.aur.require_active()?;
        Ok(spawn_batch(self.aur.clone(), BatchJob::new(action, packages)))
    }

    pub fn spawn_search(&self, query: &str) -> Result<WorkerHandle<Vec<PackageRecord>>> {
        self.aur.require_active()?;
        Ok(spawn_search(self.aur.clone(), query.to_string()))
    }

    pub fn spawn_helper_install(&self, name: &str) -> Result<WorkerHandle<HelperState>> {
        helper_spec(name)?;
        Ok(spawn_bootstrap(self.aur.clone(), name.to_string()))
    }

    pub fn spawn_helper_remove(&self, name: &str) -> Result<WorkerHandle<HelperState>> {
        helper_spec(name)?;
        let aur = self.aur.clone();
        let name = name.to_string();
        Ok(spawn_worker(move |reporter, cancel| async move {
            reporter.progress(0, format!("Removing {name}"));
            let state = aur.remove_helper(&name, &cancel).await?;
            reporter.progress(100, "Done");
            Ok(state)
        }))
    }

    pub async fn summary(&self, cancel: &CancelToken) -> SystemSummary {
        let backend = self.backend.as_ref().ok();
        SystemSummary::collect(&self.snapshot, backend, &self.aur, cancel).await
    }
}

fn assemble(
    runner: &Arc<dyn CommandRunner>,
    logger: &Arc<Logger>,
    lock: &MutationLock,
    options: &SessionOptions,
) -> (
    EnvironmentSnapshot,
    std::result::Result<PackageBackend, DetectionError>,
    AurHelperManager,
) {
    let detector = EnvironmentDetector::new(runner.clone(), options.os_release.clone());
    let snapshot = detector.snapshot();

    let backend = snapshot.backend.map(|kind| {
        let privilege = snapshot.privilege.ok();
        PackageBackend::new(kind, privilege, runner.clone(), lock.clone(), logger.clone())
    });
    match (&backend, snapshot.privilege) {
        (Ok(backend), Ok(privilege)) => logger.info(
            "DETECT",
            format!("{} on {} via {privilege}", backend.kind(), snapshot.distro.name),
        ),
        (Ok(backend), Err(err)) => logger.warn(
            "DETECT",
            format!("{} on {}; queries only: {err}", backend.kind(), snapshot.distro.name),
        ),
        (Err(err), _) => logger.warn("DETECT", err.to_string()),
    }

    let mut builder = AurSourceBuilder::new(runner.clone(), logger.clone());
    if let Some(root) = &options.build_root {
        builder = builder.with_workspace_root(root);
    }
    let aur = AurHelperManager::new(
        runner.clone(),
        detector,
        backend.clone(),
        lock.clone(),
        builder,
        snapshot.helper.clone(),
        options.aur.clone(),
        logger.clone(),
    );

    (snapshot, backend, aur)
}
