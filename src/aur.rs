/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::aur
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Track which AUR helper is active and route search,
    install and remove requests through it.

  Security / Safety Notes:
    Helpers run with user rights; they escalate on their own
    through pacman. Every call is refused outside the
    HelperActive state before any process is started.

  Dependencies:
    tokio (watch channel, timeout), CommandRunner, the source
    builder for helper bootstrap.

  Operational Scope:
    Owned by the session; cloned into search, batch and
    bootstrap workers.

  Revision History:
    2024-11-04 COD  Implemented asynchronous AUR client.
    2025-11-02 COD  Replaced RPC client with helper manager.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit state machine with published transitions
    - Bounded search latency degrading to empty results
    - No subprocess before the state check passes
============================================================*/

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::backend::{Mutation, PackageBackend};
use crate::builder::{AurSourceBuilder, BuildStage};
use crate::control::{CancelToken, MutationLock};
use crate::environment::{EnvironmentDetector, HelperState};
use crate::error::{DetectionError, DevmgrError, Result};
use crate::logger::Logger;
use crate::runner::{CommandRunner, CommandSpec};
use crate::search::{
    parse_foreign_packages, parse_search_output, ForeignPackage, PackageRecord,
    DEFAULT_REPOSITORY_MARKER,
};

/// Static description of a supported AUR helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub git_url: &'static str,
    /// Installed through the native backend before cloning, in order.
    pub build_dependencies: &'static [&'static str],
}

/// Supported helpers in detection priority order.
pub const SUPPORTED_HELPERS: [HelperSpec; 3] = [
    HelperSpec {
        name: "yay",
        description: "Yet Another Yogurt - An AUR Helper written in Go",
        git_url: "https://aur.archlinux.org/yay.git",
        build_dependencies: &["git", "base-devel"],
    },
    HelperSpec {
        name: "paru",
        description: "Feature packed AUR helper written in Rust",
        git_url: "https://aur.archlinux.org/paru.git",
        build_dependencies: &["git", "base-devel", "rust"],
    },
    HelperSpec {
        name: "trizen",
        description: "Lightweight AUR Package Manager written in Perl",
        git_url: "https://aur.archlinux.org/trizen.git",
        build_dependencies: &["git", "base-devel", "perl"],
    },
];

/// Look up a helper by name.
pub fn helper_spec(name: &str) -> Result<&'static HelperSpec> {
    SUPPORTED_HELPERS
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| DevmgrError::UnknownHelper(name.to_string()))
}

/// Tunables for the helper manager.
#[derive(Debug, Clone)]
pub struct AurOptions {
    pub search_timeout: Duration,
    pub repository_marker: String,
}

impl Default for AurOptions {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(30),
            repository_marker: DEFAULT_REPOSITORY_MARKER.to_string(),
        }
    }
}

/// AUR helper state machine plus the operations it gates.
#[derive(Clone)]
pub struct AurHelperManager {
    runner: Arc<dyn CommandRunner>,
    detector: EnvironmentDetector,
    backend: std::result::Result<PackageBackend, DetectionError>,
    lock: MutationLock,
    builder: AurSourceBuilder,
    state: Arc<watch::Sender<HelperState>>,
    options: AurOptions,
    logger: Arc<Logger>,
}

impl AurHelperManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        detector: EnvironmentDetector,
        backend: std::result::Result<PackageBackend, DetectionError>,
        lock: MutationLock,
        builder: AurSourceBuilder,
        initial: HelperState,
        options: AurOptions,
        logger: Arc<Logger>,
    ) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            runner,
            detector,
            backend,
            lock,
            builder,
            state: Arc::new(state),
            options,
            logger,
        }
    }

    pub fn state(&self) -> HelperState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<HelperState> {
        self.state.subscribe()
    }

    pub fn options(&self) -> &AurOptions {
        &self.options
    }

    /// Name of the active helper, or a `State` error explaining why there is none.
    pub fn require_active(&self) -> Result<String> {
        match self.state() {
            HelperState::HelperActive(name) => Ok(name),
            HelperState::NoHelper => Err(DevmgrError::State("No AUR helper installed".into())),
            HelperState::NotApplicable => Err(not_arch()),
        }
    }

    fn require_arch(&self) -> Result<()> {
        match self.state() {
            HelperState::NotApplicable => Err(not_arch()),
            _ => Ok(()),
        }
    }

    fn native_backend(&self) -> Result<&PackageBackend> {
        self.backend
            .as_ref()
            .map_err(|err| DevmgrError::Detection(*err))
    }

    fn publish(&self, next: HelperState) -> HelperState {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            self.logger
                .info("AUR", format!("Helper state {previous} -> {next}"));
        }
        next
    }

    /// Re-run helper detection and publish the result.
    pub fn refresh_state(&self) -> HelperState {
        self.publish(self.detector.detect_active_helper())
    }

    /// Search the AUR through the active helper.
    ///
    /// A search that outlives the configured timeout yields an empty list.
    pub async fn search(
        &self,
        query: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<PackageRecord>> {
        let helper = self.require_active()?;
        let spec = CommandSpec::new(helper, ["-Ss", query]);
        self.logger.debug("SEARCH", spec.display());

        let pending = self.runner.run(&spec, cancel);
        let output = match tokio::time::timeout(self.options.search_timeout, pending).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                let timeout = DevmgrError::Timeout {
                    command: spec.display(),
                    seconds: self.options.search_timeout.as_secs(),
                };
                self.logger.warn("SEARCH", timeout.to_string());
                return Ok(Vec::new());
            }
        };

        // Helpers exit nonzero when nothing matches; stdout is authoritative.
        let records = parse_search_output(&output.stdout, &self.options.repository_marker);
        self.logger.info(
            "SEARCH",
            format!("{} result(s) for '{query}'", records.len()),
        );
        Ok(records)
    }

    pub async fn install_package(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.run_helper(&["-S", "--noconfirm"], package, cancel).await
    }

    pub async fn remove_package(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.run_helper(&["-Rns", "--noconfirm"], package, cancel).await
    }

    /// Helpers run unprivileged, so only the mutation lock is required.
    async fn run_helper(
        &self,
        flags: &[&str],
        package: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let helper = self.require_active()?;
        let _guard = self.lock.acquire(cancel).await?;

        let spec = CommandSpec::new(
            helper,
            flags.iter().copied().chain(std::iter::once(package)),
        );
        self.logger.debug("SPAWN", spec.display());
        let result = self
            .runner
            .run(&spec, cancel)
            .await
            .and_then(|output| output.into_checked(&spec));
        match &result {
            Ok(_) => self.logger.info("AUR", spec.display()),
            Err(err) => self.logger.warn("AUR", err.to_string()),
        }
        result.map(|_| ())
    }

    /// Unprivileged pacman query, whichever helper is active.
    pub async fn is_package_installed(&self, package: &str, cancel: &CancelToken) -> bool {
        let spec = CommandSpec::new("pacman", ["-Qi", package]);
        self.logger.debug("QUERY", spec.display());
        matches!(self.runner.run(&spec, cancel).await, Ok(output) if output.success())
    }

    /// Packages installed outside the sync repositories.
    pub async fn installed_foreign_packages(
        &self,
        cancel: &CancelToken,
    ) -> Result<Vec<ForeignPackage>> {
        self.require_arch()?;
        let spec = CommandSpec::new("pacman", ["-Qm"]);
        self.logger.debug("QUERY", spec.display());
        // pacman -Qm exits 1 when there are no foreign packages.
        let output = self.runner.run(&spec, cancel).await?;
        Ok(parse_foreign_packages(&output.stdout))
    }

    /// Every catalog helper currently executable.
    pub fn installed_helpers(&self) -> Vec<&'static HelperSpec> {
        SUPPORTED_HELPERS
            .iter()
            .filter(|spec| self.detector.helper_executable(spec.name))
            .collect()
    }

    /// Build and install `name` from source, then re-detect the active helper.
    ///
    /// The mutation lock is held for the whole pipeline. On failure the
    /// published state is left as it was.
    pub async fn install_helper<F>(
        &self,
        name: &str,
        cancel: &CancelToken,
        on_stage: F,
    ) -> Result<HelperState>
    where
        F: FnMut(BuildStage) + Send,
    {
        let spec = helper_spec(name)?;
        self.require_arch()?;
        if self.detector.helper_executable(spec.name) {
            return Err(DevmgrError::State(format!("{name} is already installed")));
        }
        let backend = self.native_backend()?;
        // Dependencies and makepkg -si both escalate.
        backend.privilege()?;

        let guard = self.lock.acquire(cancel).await?;
        self.logger.info("BOOTSTRAP", format!("Installing {name} from source"));
        self.builder
            .bootstrap(&guard, backend, spec, cancel, on_stage)
            .await
            .inspect_err(|err| self.logger.error("BOOTSTRAP", err.to_string()))?;
        drop(guard);

        Ok(self.refresh_state())
    }

    /// Remove an installed helper with a single privileged removal, then re-detect.
    pub async fn remove_helper(&self, name: &str, cancel: &CancelToken) -> Result<HelperState> {
        let spec = helper_spec(name)?;
        self.require_arch()?;
        if !self.detector.helper_executable(spec.name) {
            return Err(DevmgrError::State(format!("{name} is not installed")));
        }
        self.native_backend()?
            .mutate(Mutation::Cleanup, spec.name, cancel)
            .await
            .inspect_err(|err| self.logger.warn("AUR", err.to_string()))?;
        Ok(self.refresh_state())
    }
}

fn not_arch() -> DevmgrError {
    DevmgrError::State("AUR helpers are only available on Arch-based systems".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{BackendKind, PrivilegeMethod};
    use crate::runner::{Reply, ScriptedRunner};
    use std::fs;

    struct Fixture {
        runner: Arc<ScriptedRunner>,
        manager: AurHelperManager,
        _dir: tempfile::TempDir,
    }

    fn fixture(programs: &[&str], release: &str, timeout: Duration) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let release_path = dir.path().join("os-release");
        fs::write(&release_path, release).expect("write os-release");

        let runner = Arc::new(ScriptedRunner::with_programs(programs));
        let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
        let logger = Arc::new(Logger::quiet());
        let detector = EnvironmentDetector::new(dyn_runner.clone(), release_path);
        let lock = MutationLock::new();
        let privilege = programs.contains(&"sudo").then_some(PrivilegeMethod::Sudo);
        let backend = PackageBackend::new(
            BackendKind::Pacman,
            privilege,
            dyn_runner.clone(),
            lock.clone(),
            logger.clone(),
        );
        let builder = AurSourceBuilder::new(dyn_runner.clone(), logger.clone());
        let manager = AurHelperManager::new(
            dyn_runner,
            detector.clone(),
            Ok(backend),
            lock,
            builder,
            detector.detect_active_helper(),
            AurOptions {
                search_timeout: timeout,
                ..AurOptions::default()
            },
            logger,
        );
        Fixture {
            runner,
            manager,
            _dir: dir,
        }
    }

    #[test]
    fn test_catalog_lookup() {
        assert_eq!(helper_spec("paru").expect("paru").build_dependencies.len(), 3);
        assert!(matches!(
            helper_spec("pikaur"),
            Err(DevmgrError::UnknownHelper(_))
        ));
        let names: Vec<&str> = SUPPORTED_HELPERS.iter().map(|spec| spec.name).collect();
        assert_eq!(names, ["yay", "paru", "trizen"]);
    }

    #[tokio::test]
    async fn test_no_helper_refuses_without_spawning() {
        let fx = fixture(&["pacman", "sudo"], "ID=arch\n", Duration::from_secs(30));
        let cancel = CancelToken::new();
        assert_eq!(fx.manager.state(), HelperState::NoHelper);

        let search = fx.manager.search("discord", &cancel).await;
        let install = fx.manager.install_package("discord", &cancel).await;
        let remove = fx.manager.remove_package("discord", &cancel).await;
        assert!(search.expect_err("state").is_state_error());
        assert!(install.expect_err("state").is_state_error());
        assert!(remove.expect_err("state").is_state_error());
        assert_eq!(fx.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_not_applicable_refuses_everything() {
        let fx = fixture(&["apt", "sudo"], "ID=debian\n", Duration::from_secs(30));
        let cancel = CancelToken::new();
        assert_eq!(fx.manager.state(), HelperState::NotApplicable);
        assert!(fx
            .manager
            .install_helper("yay", &cancel, |_| {})
            .await
            .expect_err("state")
            .is_state_error());
        assert!(fx
            .manager
            .installed_foreign_packages(&cancel)
            .await
            .expect_err("state")
            .is_state_error());
        assert_eq!(fx.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_search_parses_helper_output() {
        let fx = fixture(&["pacman", "sudo", "paru"], "ID=arch\n", Duration::from_secs(30));
        fx.runner.on(
            &["paru", "-Ss", "discord"],
            Reply::exit(0).stdout(
                "aur/discord 0.0.40-1 (+9876 8.91%)\n    All-in-one voice and text chat\n",
            ),
        );
        let records = fx
            .manager
            .search("discord", &CancelToken::new())
            .await
            .expect("search");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].votes, 9876);
    }

    #[tokio::test]
    async fn test_search_timeout_degrades_to_empty() {
        let fx = fixture(&["pacman", "sudo", "yay"], "ID=arch\n", Duration::from_millis(50));
        fx.runner.on(&["yay", "-Ss"], Reply::hang());
        let records = fx
            .manager
            .search("slow", &CancelToken::new())
            .await
            .expect("timeout is not an error");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_remove_helper_redetects() {
        let fx = fixture(
            &["pacman", "sudo", "yay", "paru"],
            "ID=arch\n",
            Duration::from_secs(30),
        );
        assert_eq!(fx.manager.state(), HelperState::HelperActive("yay".into()));
        let mut updates = fx.manager.subscribe();
        fx.runner.on(
            &["pacman", "-Rns", "--noconfirm", "yay"],
            Reply::exit(0).withdraws("yay"),
        );

        let next = fx
            .manager
            .remove_helper("yay", &CancelToken::new())
            .await
            .expect("remove");
        assert_eq!(next, HelperState::HelperActive("paru".into()));
        assert!(updates.has_changed().expect("sender alive"));
        assert_eq!(*updates.borrow_and_update(), next);
        assert_eq!(fx.runner.count_matching(&["sudo", "pacman", "-Rns"]), 1);
    }

    #[tokio::test]
    async fn test_remove_helper_failure_keeps_state() {
        let fx = fixture(&["pacman", "sudo", "yay"], "ID=arch\n", Duration::from_secs(30));
        fx.runner.on(&["pacman", "-Rns"], Reply::exit(1).stderr("target not found"));
        let cancel = CancelToken::new();
        assert!(fx.manager.remove_helper("yay", &cancel).await.is_err());
        assert_eq!(fx.manager.state(), HelperState::HelperActive("yay".into()));
        assert!(fx
            .manager
            .remove_helper("trizen", &cancel)
            .await
            .expect_err("not installed")
            .is_state_error());
    }

    #[tokio::test]
    async fn test_foreign_packages_tolerate_empty_listing() {
        let fx = fixture(&["pacman", "sudo"], "ID=arch\n", Duration::from_secs(30));
        fx.runner.on(&["pacman", "-Qm"], Reply::exit(1));
        let packages = fx
            .manager
            .installed_foreign_packages(&CancelToken::new())
            .await
            .expect("listing");
        assert!(packages.is_empty());
        assert!(fx.manager.installed_helpers().is_empty());
    }

    #[tokio::test]
    async fn test_helper_packages_need_no_privilege_method() {
        let fx = fixture(&["pacman", "yay"], "ID=arch\n", Duration::from_secs(30));
        let cancel = CancelToken::new();
        fx.manager
            .install_package("discord", &cancel)
            .await
            .expect("helper runs unprivileged");
        assert_eq!(fx.runner.count_matching(&["yay", "-S", "--noconfirm", "discord"]), 1);

        let err = fx
            .manager
            .remove_helper("yay", &cancel)
            .await
            .expect_err("removal escalates");
        assert!(matches!(
            err,
            DevmgrError::Detection(DetectionError::NoPrivilegeMethod)
        ));
        assert_eq!(fx.manager.state(), HelperState::HelperActive("yay".into()));
        assert_eq!(fx.runner.count_matching(&["pacman", "-Rns"]), 0);
    }
}
