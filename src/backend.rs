/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::backend
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Uniform install/remove/upgrade/query contract over the
    native package managers (apt, yum, dnf, pacman, zypper).

  Security / Safety Notes:
    Only mutating actions are prefixed with the detected
    privilege method; queries always run with user rights.

  Dependencies:
    CommandRunner for process execution.

  Operational Scope:
    Target of batch jobs, development packs and the AUR helper
    bootstrap's dependency stage.

  Revision History:
    2024-11-04 COD  Crafted pacman integration layer.
    2025-11-02 COD  Generalised to every supported backend.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Exhaustive per-backend argv tables
    - Nonzero exits surface as values, never aborts
    - Mutations serialised through the process-wide lock
============================================================*/

use std::sync::Arc;

use crate::control::{CancelToken, MutationGuard, MutationLock};
use crate::environment::{BackendKind, PrivilegeMethod};
use crate::error::{DetectionError, DevmgrError, Result};
use crate::logger::Logger;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

/// Privileged actions a backend can perform on the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Install,
    Remove,
    Upgrade,
    /// Remove a package together with dependencies nothing else needs.
    Cleanup,
    /// Refresh the package lists; takes no package argument.
    RefreshDatabases,
}

impl Mutation {
    pub fn verb(self) -> &'static str {
        match self {
            Mutation::Install => "install",
            Mutation::Remove => "remove",
            Mutation::Upgrade => "upgrade",
            Mutation::Cleanup => "clean up",
            Mutation::RefreshDatabases => "refresh package databases",
        }
    }
}

fn argv(parts: &[&str], package: Option<&str>) -> Vec<String> {
    parts
        .iter()
        .copied()
        .chain(package)
        .map(str::to_string)
        .collect()
}

impl BackendKind {
    /// Unprivileged argv for `mutation`; the privilege prefix is added by the caller.
    pub fn mutation_argv(self, mutation: Mutation, package: &str) -> Vec<String> {
        use BackendKind::*;
        use Mutation::*;
        let pkg = Some(package);
        match (self, mutation) {
            (Apt, Install) => argv(&["apt", "install", "-y"], pkg),
            (Apt, Remove) => argv(&["apt", "remove", "-y"], pkg),
            (Apt, Upgrade) => argv(&["apt", "install", "--only-upgrade", "-y"], pkg),
            (Apt, Cleanup) => argv(&["apt", "autoremove", "-y"], pkg),
            (Apt, RefreshDatabases) => argv(&["apt", "update"], None),

            (Yum, Install) => argv(&["yum", "install", "-y"], pkg),
            (Yum, Remove) => argv(&["yum", "remove", "-y"], pkg),
            (Yum, Upgrade) => argv(&["yum", "update", "-y"], pkg),
            (Yum, Cleanup) => argv(&["yum", "autoremove", "-y"], pkg),
            (Yum, RefreshDatabases) => argv(&["yum", "check-update"], None),

            (Dnf, Install) => argv(&["dnf", "install", "-y"], pkg),
            (Dnf, Remove) => argv(&["dnf", "remove", "-y"], pkg),
            (Dnf, Upgrade) => argv(&["dnf", "upgrade", "-y"], pkg),
            (Dnf, Cleanup) => argv(&["dnf", "autoremove", "-y"], pkg),
            (Dnf, RefreshDatabases) => argv(&["dnf", "check-update"], None),

            (Pacman, Install) => argv(&["pacman", "-S", "--noconfirm"], pkg),
            (Pacman, Remove) => argv(&["pacman", "-R", "--noconfirm"], pkg),
            (Pacman, Upgrade) => argv(&["pacman", "-S", "--noconfirm"], pkg),
            (Pacman, Cleanup) => argv(&["pacman", "-Rns", "--noconfirm"], pkg),
            (Pacman, RefreshDatabases) => argv(&["pacman", "-Sy"], None),

            (Zypper, Install) => argv(&["zypper", "install", "-y"], pkg),
            (Zypper, Remove) => argv(&["zypper", "remove", "-y"], pkg),
            (Zypper, Upgrade) => argv(&["zypper", "update", "-y"], pkg),
            (Zypper, Cleanup) => argv(&["zypper", "remove", "--clean-deps", "-y"], pkg),
            (Zypper, RefreshDatabases) => argv(&["zypper", "refresh"], None),
        }
    }

    /// Unprivileged installed-check argv.
    pub fn query_argv(self, package: &str) -> Vec<String> {
        let pkg = Some(package);
        match self {
            BackendKind::Apt => argv(&["dpkg", "-s"], pkg),
            BackendKind::Pacman => argv(&["pacman", "-Qi"], pkg),
            BackendKind::Yum | BackendKind::Dnf | BackendKind::Zypper => argv(&["rpm", "-q"], pkg),
        }
    }

    /// Unprivileged listing of every installed package.
    pub fn list_installed_argv(self) -> Vec<String> {
        match self {
            BackendKind::Apt => argv(&["dpkg", "-l"], None),
            BackendKind::Pacman => argv(&["pacman", "-Q"], None),
            BackendKind::Yum | BackendKind::Dnf | BackendKind::Zypper => {
                argv(&["rpm", "-qa"], None)
            }
        }
    }

    /// Unprivileged listing of pending upgrades.
    pub fn list_updates_argv(self) -> Vec<String> {
        match self {
            BackendKind::Apt => argv(&["apt", "list", "--upgradable"], None),
            BackendKind::Yum => argv(&["yum", "check-update", "-q"], None),
            BackendKind::Dnf => argv(&["dnf", "check-update", "-q"], None),
            BackendKind::Pacman => argv(&["pacman", "-Qu"], None),
            BackendKind::Zypper => argv(&["zypper", "-q", "list-updates"], None),
        }
    }

    /// Exit codes other than zero that still mean the command worked.
    fn accepts_status(self, mutation: Mutation, status: Option<i32>) -> bool {
        match (self, mutation, status) {
            (_, _, Some(0)) => true,
            // check-update exits 100 when updates are available.
            (BackendKind::Yum | BackendKind::Dnf, Mutation::RefreshDatabases, Some(100)) => true,
            _ => false,
        }
    }

    fn count_installed(self, stdout: &str) -> usize {
        match self {
            BackendKind::Apt => stdout.lines().filter(|line| line.starts_with("ii")).count(),
            _ => count_nonempty(stdout),
        }
    }

    fn count_updates(self, stdout: &str) -> usize {
        match self {
            BackendKind::Apt => stdout.lines().filter(|line| line.contains('/')).count(),
            BackendKind::Zypper => stdout.lines().filter(|line| line.starts_with("v ")).count(),
            BackendKind::Yum | BackendKind::Dnf | BackendKind::Pacman => count_nonempty(stdout),
        }
    }
}

fn count_nonempty(stdout: &str) -> usize {
    stdout.lines().filter(|line| !line.trim().is_empty()).count()
}

/// A detected backend and, when one was found, its privilege method.
///
/// Queries only need the backend; mutations also need a privilege method.
#[derive(Clone)]
pub struct PackageBackend {
    kind: BackendKind,
    privilege: Option<PrivilegeMethod>,
    runner: Arc<dyn CommandRunner>,
    lock: MutationLock,
    logger: Arc<Logger>,
}

impl PackageBackend {
    pub fn new(
        kind: BackendKind,
        privilege: Option<PrivilegeMethod>,
        runner: Arc<dyn CommandRunner>,
        lock: MutationLock,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            kind,
            privilege,
            runner,
            lock,
            logger,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Privilege method used for mutations; a `Detection` error when none was found.
    pub fn privilege(&self) -> Result<PrivilegeMethod> {
        self.privilege
            .ok_or(DevmgrError::Detection(DetectionError::NoPrivilegeMethod))
    }

    pub fn mutation_lock(&self) -> &MutationLock {
        &self.lock
    }

    /// Full privileged command line for `mutation`.
    pub fn mutation_spec(&self, mutation: Mutation, package: &str) -> Result<CommandSpec> {
        let privilege = self.privilege()?;
        let mut full: Vec<String> = privilege
            .prefix()
            .iter()
            .map(|token| token.to_string())
            .collect();
        full.extend(self.kind.mutation_argv(mutation, package));
        Ok(CommandSpec::from_argv(full)
            .unwrap_or_else(|| CommandSpec::new(privilege.program(), Vec::<String>::new())))
    }

    pub fn query_spec(&self, package: &str) -> CommandSpec {
        CommandSpec::from_argv(self.kind.query_argv(package))
            .unwrap_or_else(|| CommandSpec::new(self.kind.program(), Vec::<String>::new()))
    }

    pub async fn install(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(Mutation::Install, package, cancel).await
    }

    pub async fn remove(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(Mutation::Remove, package, cancel).await
    }

    pub async fn upgrade(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(Mutation::Upgrade, package, cancel).await
    }

    pub async fn cleanup(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.mutate(Mutation::Cleanup, package, cancel).await
    }

    pub async fn refresh_databases(&self, cancel: &CancelToken) -> Result<()> {
        self.mutate(Mutation::RefreshDatabases, "", cancel).await
    }

    /// Acquire the mutation lock, then run the privileged command.
    ///
    /// Without a privilege method this fails before waiting on the lock.
    pub async fn mutate(
        &self,
        mutation: Mutation,
        package: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.privilege()?;
        let guard = self.lock.acquire(cancel).await?;
        self.mutate_held(&guard, mutation, package, cancel).await
    }

    /// Run a privileged command while the caller already holds the mutation lock.
    pub async fn mutate_held(
        &self,
        _guard: &MutationGuard,
        mutation: Mutation,
        package: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let spec = self.mutation_spec(mutation, package)?;
        self.logger.debug("SPAWN", spec.display());
        let output = self.runner.run(&spec, cancel).await.inspect_err(|err| {
            self.logger.warn("EXEC", format!("{}: {err}", spec.display()));
        })?;
        if self.kind.accepts_status(mutation, output.status) {
            self.logger.info(
                "EXEC",
                format!("{} {} via {}", mutation.verb(), package, self.kind),
            );
            Ok(())
        } else {
            let err = output.failure(&spec);
            self.logger.warn("EXEC", err.to_string());
            Err(err)
        }
    }

    /// Unprivileged installed-check; any failure reads as "not installed".
    pub async fn is_installed(&self, package: &str, cancel: &CancelToken) -> bool {
        let spec = self.query_spec(package);
        self.logger.debug("QUERY", spec.display());
        match self.runner.run(&spec, cancel).await {
            Ok(output) => output.success(),
            Err(err) => {
                self.logger.debug("QUERY", format!("{}: {err}", spec.display()));
                false
            }
        }
    }

    /// Number of installed packages; 0 when the listing fails.
    pub async fn installed_count(&self, cancel: &CancelToken) -> usize {
        match self.query_listing(self.kind.list_installed_argv(), cancel).await {
            Some(output) if output.success() => self.kind.count_installed(&output.stdout),
            _ => 0,
        }
    }

    /// Number of pending upgrades; 0 when the listing fails.
    pub async fn available_updates(&self, cancel: &CancelToken) -> usize {
        match self.query_listing(self.kind.list_updates_argv(), cancel).await {
            // check-update signals pending updates with 100.
            Some(output) if matches!(output.status, Some(0) | Some(100)) => {
                self.kind.count_updates(&output.stdout)
            }
            _ => 0,
        }
    }

    async fn query_listing(
        &self,
        argv: Vec<String>,
        cancel: &CancelToken,
    ) -> Option<CommandOutput> {
        let spec = CommandSpec::from_argv(argv)?;
        self.logger.debug("QUERY", spec.display());
        self.runner.run(&spec, cancel).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{Reply, ScriptedRunner};

    const ALL_MUTATIONS: [Mutation; 5] = [
        Mutation::Install,
        Mutation::Remove,
        Mutation::Upgrade,
        Mutation::Cleanup,
        Mutation::RefreshDatabases,
    ];

    fn backend(kind: BackendKind, runner: Arc<ScriptedRunner>) -> PackageBackend {
        PackageBackend::new(
            kind,
            Some(PrivilegeMethod::Sudo),
            runner,
            MutationLock::new(),
            Arc::new(Logger::quiet()),
        )
    }

    #[test]
    fn test_query_never_matches_install_template() {
        for kind in BackendKind::PRIORITY {
            let query = kind.query_argv("git");
            let install = kind.mutation_argv(Mutation::Install, "git");
            assert_ne!(query, install, "{kind}");
            assert_ne!(query[0], "sudo");
        }
    }

    #[test]
    fn test_argv_tables() {
        assert_eq!(
            BackendKind::Apt.mutation_argv(Mutation::Upgrade, "vim"),
            vec!["apt", "install", "--only-upgrade", "-y", "vim"]
        );
        assert_eq!(
            BackendKind::Pacman.mutation_argv(Mutation::Remove, "vim"),
            vec!["pacman", "-R", "--noconfirm", "vim"]
        );
        assert_eq!(
            BackendKind::Yum.mutation_argv(Mutation::Upgrade, "vim"),
            vec!["yum", "update", "-y", "vim"]
        );
        assert_eq!(
            BackendKind::Zypper.query_argv("vim"),
            vec!["rpm", "-q", "vim"]
        );
        for kind in BackendKind::PRIORITY {
            for mutation in ALL_MUTATIONS {
                let argv = kind.mutation_argv(mutation, "pkg");
                assert_eq!(argv[0], kind.program());
                let takes_package = mutation != Mutation::RefreshDatabases;
                assert_eq!(argv.last().map(String::as_str) == Some("pkg"), takes_package);
            }
        }
    }

    #[test]
    fn test_privilege_prefix_is_prepended_verbatim() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut gk = backend(BackendKind::Dnf, runner);
        gk.privilege = Some(PrivilegeMethod::Gksudo);
        assert_eq!(
            gk.mutation_spec(Mutation::Install, "git")
                .expect("privileged")
                .argv(),
            vec!["gksudo", "--", "dnf", "install", "-y", "git"]
        );
        assert_eq!(gk.query_spec("git").argv(), vec!["rpm", "-q", "git"]);
    }

    #[tokio::test]
    async fn test_install_reports_nonzero_exit() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            &["pacman", "-S", "--noconfirm", "broken"],
            Reply::exit(1).stderr("target not found"),
        );
        let backend = backend(BackendKind::Pacman, runner.clone());
        let cancel = CancelToken::new();

        assert!(backend.install("git", &cancel).await.is_ok());
        let err = backend.install("broken", &cancel).await.expect_err("must fail");
        assert!(err.to_string().contains("target not found"));
        assert_eq!(runner.count_matching(&["sudo", "pacman", "-S"]), 2);
    }

    #[tokio::test]
    async fn test_missing_binary_reads_as_not_installed() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["dpkg"], Reply::missing());
        let backend = backend(BackendKind::Apt, runner);
        assert!(!backend.is_installed("vim", &CancelToken::new()).await);
    }

    #[tokio::test]
    async fn test_check_update_exit_100_is_success() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            &["dnf", "check-update"],
            Reply::exit(100).stdout("vim.x86_64 9.1 updates\n"),
        );
        let backend = backend(BackendKind::Dnf, runner);
        let cancel = CancelToken::new();
        assert!(backend.refresh_databases(&cancel).await.is_ok());
        assert_eq!(backend.available_updates(&cancel).await, 1);
    }

    #[tokio::test]
    async fn test_counts_per_backend() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            &["dpkg", "-l"],
            Reply::exit(0)
                .stdout("Desired=Unknown\n||/ Name\nii  git 1:2.43\nii  vim 2:9.1\nrc  old 1.0\n"),
        );
        runner.on(
            &["apt", "list", "--upgradable"],
            Reply::exit(0)
                .stdout("Listing...\nvim/jammy-updates 2:9.1 amd64 [upgradable from: 2:9.0]\n"),
        );
        let backend = backend(BackendKind::Apt, runner);
        let cancel = CancelToken::new();
        assert_eq!(backend.installed_count(&cancel).await, 2);
        assert_eq!(backend.available_updates(&cancel).await, 1);
    }

    #[tokio::test]
    async fn test_queries_work_without_privilege_method() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(&["pacman", "-Q"], Reply::exit(0).stdout("git 2.47.0-1\nvim 9.1-1\n"));
        let backend = PackageBackend::new(
            BackendKind::Pacman,
            None,
            runner.clone(),
            MutationLock::new(),
            Arc::new(Logger::quiet()),
        );
        let cancel = CancelToken::new();

        assert!(backend.is_installed("git", &cancel).await);
        assert_eq!(backend.installed_count(&cancel).await, 2);
        let err = backend.install("git", &cancel).await.expect_err("no privilege");
        assert!(matches!(
            err,
            DevmgrError::Detection(DetectionError::NoPrivilegeMethod)
        ));
        assert_eq!(runner.count_matching(&["pacman", "-S"]), 0);
    }

    #[tokio::test]
    async fn test_mutations_wait_for_lock_but_queries_do_not() {
        let runner = Arc::new(ScriptedRunner::new());
        let backend = backend(BackendKind::Apt, runner.clone());
        let held = backend
            .mutation_lock()
            .acquire(&CancelToken::new())
            .await
            .expect("lock");

        let cancel = CancelToken::new();
        let waiting = {
            let backend = backend.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { backend.install("nginx", &cancel).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(runner.count_matching(&["apt", "install"]), 0);

        let query = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            backend.is_installed("nginx", &cancel),
        )
        .await;
        assert!(matches!(query, Ok(true)));

        drop(held);
        waiting.await.expect("join").expect("install");
        assert_eq!(runner.count_matching(&["sudo", "apt", "install", "-y", "nginx"]), 1);
    }
}
