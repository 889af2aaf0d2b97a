/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::builder
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Bootstrap an AUR helper from source: dependencies, clone,
    makepkg, then confirm the binary resolves on PATH.

  Security / Safety Notes:
    Sources are cloned into a private temporary workspace that
    is removed on every exit path, including cancellation.
    makepkg runs with user rights.

  Dependencies:
    tempfile for the scoped workspace, CommandRunner, the
    package backend's lock-held install.

  Operational Scope:
    Driven by the AUR helper manager while it holds the
    process-wide mutation lock.

  Revision History:
    2025-11-02 COD  Authored helper bootstrap pipeline.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Ordered stages with first-failure short circuit
    - Failures name the stage that produced them
    - No leaked build directories
============================================================*/

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crate::aur::HelperSpec;
use crate::backend::{Mutation, PackageBackend};
use crate::control::{CancelToken, MutationGuard};
use crate::error::{DevmgrError, Result};
use crate::logger::Logger;
use crate::runner::{CommandRunner, CommandSpec};

/// Bootstrap pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Dependencies,
    Clone,
    Build,
    Verify,
}

impl BuildStage {
    pub const ALL: [BuildStage; 4] = [
        BuildStage::Dependencies,
        BuildStage::Clone,
        BuildStage::Build,
        BuildStage::Verify,
    ];

    /// Progress reported when the stage starts.
    pub fn percent(self) -> u8 {
        match self {
            BuildStage::Dependencies => 0,
            BuildStage::Clone => 25,
            BuildStage::Build => 50,
            BuildStage::Verify => 75,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BuildStage::Dependencies => "Installing build dependencies",
            BuildStage::Clone => "Cloning sources",
            BuildStage::Build => "Building with makepkg",
            BuildStage::Verify => "Verifying installation",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStage::Dependencies => "dependencies",
            BuildStage::Clone => "clone",
            BuildStage::Build => "build",
            BuildStage::Verify => "verify",
        })
    }
}

/// Runs the bootstrap pipeline for one helper at a time.
#[derive(Clone)]
pub struct AurSourceBuilder {
    runner: Arc<dyn CommandRunner>,
    logger: Arc<Logger>,
    workspace_root: Option<PathBuf>,
}

impl AurSourceBuilder {
    pub fn new(runner: Arc<dyn CommandRunner>, logger: Arc<Logger>) -> Self {
        Self {
            runner,
            logger,
            workspace_root: None,
        }
    }

    /// Create build workspaces under `root` instead of the system temp dir.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Execute every stage for `spec`, stopping at the first failure.
    ///
    /// Dependencies installed before a later failure are left in place.
    pub async fn bootstrap<F>(
        &self,
        guard: &MutationGuard,
        backend: &PackageBackend,
        spec: &HelperSpec,
        cancel: &CancelToken,
        mut on_stage: F,
    ) -> Result<()>
    where
        F: FnMut(BuildStage) + Send,
    {
        on_stage(BuildStage::Dependencies);
        self.install_dependencies(guard, backend, spec, cancel)
            .await
            .map_err(|err| staged(spec, BuildStage::Dependencies, err))?;

        on_stage(BuildStage::Clone);
        let workspace = self
            .workspace(spec)
            .map_err(|err| staged(spec, BuildStage::Clone, err))?;
        let source_dir = workspace.path().join(spec.name);
        let clone = CommandSpec::new(
            "git",
            [
                "clone".to_string(),
                spec.git_url.to_string(),
                source_dir.to_string_lossy().into_owned(),
            ],
        );
        self.run_checked(&clone, cancel)
            .await
            .map_err(|err| staged(spec, BuildStage::Clone, err))?;

        on_stage(BuildStage::Build);
        let build = CommandSpec::new("makepkg", ["-si", "--noconfirm"]).in_dir(&source_dir);
        self.run_checked(&build, cancel)
            .await
            .map_err(|err| staged(spec, BuildStage::Build, err))?;

        if let Err(err) = workspace.close() {
            self.logger
                .warn("BOOTSTRAP", format!("Failed to remove build workspace: {err}"));
        }

        on_stage(BuildStage::Verify);
        if !self.runner.which(spec.name) {
            return Err(staged(
                spec,
                BuildStage::Verify,
                DevmgrError::HelperNotDetected {
                    helper: spec.name.to_string(),
                },
            ));
        }
        self.logger
            .info("BOOTSTRAP", format!("{} installed and on PATH", spec.name));
        Ok(())
    }

    async fn install_dependencies(
        &self,
        guard: &MutationGuard,
        backend: &PackageBackend,
        spec: &HelperSpec,
        cancel: &CancelToken,
    ) -> Result<()> {
        for dependency in spec.build_dependencies {
            if backend.is_installed(dependency, cancel).await {
                self.logger
                    .debug("BOOTSTRAP", format!("{dependency} already present"));
                continue;
            }
            backend
                .mutate_held(guard, Mutation::Install, dependency, cancel)
                .await
                .map_err(|err| match err {
                    DevmgrError::Cancelled => DevmgrError::Cancelled,
                    other => DevmgrError::DependencyInstall {
                        helper: spec.name.to_string(),
                        dependency: dependency.to_string(),
                        reason: other.to_string(),
                    },
                })?;
        }
        Ok(())
    }

    fn workspace(&self, spec: &HelperSpec) -> Result<TempDir> {
        let prefix = format!("devmgr-{}-", spec.name);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let created = match &self.workspace_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        created.map_err(|err| {
            DevmgrError::Filesystem(format!("Failed to create build workspace: {err}"))
        })
    }

    async fn run_checked(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<()> {
        self.logger.debug("SPAWN", spec.display());
        self.runner
            .run(spec, cancel)
            .await?
            .into_checked(spec)
            .map(|_| ())
    }
}

/// Attach the failing stage; cancellation passes through untouched.
fn staged(spec: &HelperSpec, stage: BuildStage, err: DevmgrError) -> DevmgrError {
    match err {
        DevmgrError::Cancelled => DevmgrError::Cancelled,
        other => DevmgrError::Bootstrap {
            helper: spec.name.to_string(),
            stage,
            source: Box::new(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aur::helper_spec;
    use crate::control::MutationLock;
    use crate::environment::{BackendKind, PrivilegeMethod};
    use crate::runner::{Reply, ScriptedRunner};
    use std::fs;
    use std::path::Path;

    fn harness(runner: Arc<ScriptedRunner>, root: &Path) -> (AurSourceBuilder, PackageBackend) {
        let logger = Arc::new(Logger::quiet());
        let builder =
            AurSourceBuilder::new(runner.clone(), logger.clone()).with_workspace_root(root);
        let backend = PackageBackend::new(
            BackendKind::Pacman,
            Some(PrivilegeMethod::Sudo),
            runner,
            MutationLock::new(),
            logger,
        );
        (builder, backend)
    }

    fn leftover(root: &Path) -> usize {
        fs::read_dir(root).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_clone_failure_cleans_workspace_and_skips_build() {
        let root = tempfile::tempdir().expect("root");
        let runner = Arc::new(ScriptedRunner::with_programs(&["pacman", "sudo"]));
        runner.on(&["git", "clone"], Reply::exit(128).stderr("could not resolve host"));
        let (builder, backend) = harness(runner.clone(), root.path());
        let cancel = CancelToken::new();
        let guard = backend.mutation_lock().acquire(&cancel).await.expect("lock");

        let yay = helper_spec("yay").expect("yay");
        let mut stages = Vec::new();
        let err = builder
            .bootstrap(&guard, &backend, yay, &cancel, |stage| stages.push(stage))
            .await
            .expect_err("clone fails");

        assert!(matches!(
            err,
            DevmgrError::Bootstrap {
                stage: BuildStage::Clone,
                ..
            }
        ));
        assert_eq!(stages, [BuildStage::Dependencies, BuildStage::Clone]);
        assert_eq!(runner.count_matching(&["makepkg"]), 0);
        assert_eq!(leftover(root.path()), 0);
    }

    #[tokio::test]
    async fn test_dependency_failure_names_dependency() {
        let root = tempfile::tempdir().expect("root");
        let runner = Arc::new(ScriptedRunner::with_programs(&["pacman", "sudo"]));
        runner
            .on(&["pacman", "-Qi"], Reply::exit(1))
            .on(
                &["pacman", "-S", "--noconfirm", "rust"],
                Reply::exit(1).stderr("conflict"),
            );
        let (builder, backend) = harness(runner.clone(), root.path());
        let cancel = CancelToken::new();
        let guard = backend.mutation_lock().acquire(&cancel).await.expect("lock");

        let paru = helper_spec("paru").expect("paru");
        let err = builder
            .bootstrap(&guard, &backend, paru, &cancel, |_| {})
            .await
            .expect_err("dependency fails");

        match err {
            DevmgrError::Bootstrap { stage, source, .. } => {
                assert_eq!(stage, BuildStage::Dependencies);
                assert!(matches!(
                    *source,
                    DevmgrError::DependencyInstall { ref dependency, .. } if dependency == "rust"
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.count_matching(&["sudo", "pacman", "-S"]), 3);
        assert_eq!(runner.count_matching(&["git", "clone"]), 0);
        assert_eq!(leftover(root.path()), 0);
    }

    #[tokio::test]
    async fn test_silent_build_failure_is_distinct() {
        let root = tempfile::tempdir().expect("root");
        let runner = Arc::new(ScriptedRunner::with_programs(&["pacman", "sudo"]));
        let (builder, backend) = harness(runner.clone(), root.path());
        let cancel = CancelToken::new();
        let guard = backend.mutation_lock().acquire(&cancel).await.expect("lock");

        let trizen = helper_spec("trizen").expect("trizen");
        let err = builder
            .bootstrap(&guard, &backend, trizen, &cancel, |_| {})
            .await
            .expect_err("binary missing");

        match err {
            DevmgrError::Bootstrap { stage, source, .. } => {
                assert_eq!(stage, BuildStage::Verify);
                assert!(matches!(*source, DevmgrError::HelperNotDetected { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let build = runner
            .calls()
            .into_iter()
            .find(|call| call.program == "makepkg")
            .expect("makepkg ran");
        let cwd = build.cwd.expect("build dir");
        assert!(cwd.ends_with("trizen"));
        assert!(!cwd.exists());
    }

    #[tokio::test]
    async fn test_cancel_during_build_removes_workspace() {
        let root = tempfile::tempdir().expect("root");
        let runner = Arc::new(ScriptedRunner::with_programs(&["pacman", "sudo"]));
        runner.on(&["makepkg"], Reply::hang());
        let (builder, backend) = harness(runner.clone(), root.path());
        let cancel = CancelToken::new();
        let guard = backend.mutation_lock().acquire(&cancel).await.expect("lock");

        let yay = helper_spec("yay").expect("yay");
        let trigger = cancel.clone();
        let outcome = builder.bootstrap(&guard, &backend, yay, &cancel, move |stage| {
            if stage == BuildStage::Build {
                trigger.cancel();
            }
        });
        let err = outcome.await.expect_err("cancelled");
        assert!(matches!(err, DevmgrError::Cancelled));
        assert_eq!(leftover(root.path()), 0);
    }

    #[test]
    fn test_stage_progress_is_monotonic() {
        let percents: Vec<u8> = BuildStage::ALL.iter().map(|stage| stage.percent()).collect();
        assert!(percents.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(BuildStage::Clone.to_string(), "clone");
    }
}
