/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::runner
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Single seam through which every external process is
    launched, plus a scripted stand-in for tests.

  Security / Safety Notes:
    Commands are spawned from explicit argv vectors; no shell
    is involved. Cancelled children receive SIGTERM and are
    killed when their handle drops, unless they run as root
    through the privilege method.

  Dependencies:
    tokio::process for async execution, which for PATH lookup,
    libc for signalling, async-trait for the runner trait.

  Operational Scope:
    Used by environment detection, package backends, the AUR
    helper manager and the source builder.

  Revision History:
    2024-11-04 COD  Crafted command diagnostics helpers.
    2025-11-02 COD  Extracted runner trait and scripted runner.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic command invocation with explicit checks
    - Reusable helpers for external command diagnostics
============================================================*/

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::control::CancelToken;
use crate::error::{DevmgrError, Result};

/// Fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    /// Build from a full argv (`argv[0]` is the program).
    pub fn from_argv(argv: Vec<String>) -> Option<Self> {
        let mut parts = argv.into_iter();
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            cwd: None,
        })
    }

    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    pub fn display(&self) -> String {
        self.argv().join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Convert a nonzero exit into `CommandFailure`.
    pub fn into_checked(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(self.failure(spec))
        }
    }

    pub fn failure(&self, spec: &CommandSpec) -> DevmgrError {
        DevmgrError::CommandFailure {
            command: spec.display(),
            status: self.status.unwrap_or(-1),
            stderr: self.stderr.trim().to_string(),
        }
    }
}

/// Launches external processes on behalf of the core.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, or until `cancel` fires.
    async fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput>;

    /// True when `program` resolves to an executable on PATH.
    fn which(&self, program: &str) -> bool;
}

/// Runner backed by real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput> {
        cancel.check()?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|err| map_spawn_error(err, &spec.program))?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let completion = async { tokio::join!(child.wait(), drain(stdout), drain(stderr)) };

        tokio::select! {
            (status, stdout, stderr) = completion => {
                let status = status.map_err(|err| {
                    DevmgrError::Runtime(format!("Failed to wait for {}: {err}", spec.program))
                })?;
                Ok(CommandOutput {
                    status: status.code(),
                    stdout,
                    stderr,
                })
            }
            _ = cancel.cancelled() => {
                if let Some(pid) = pid {
                    terminate(pid);
                }
                // kill_on_drop follows up with SIGKILL. Neither signal reaches a
                // child running under pkexec or sudo as root; such a child keeps
                // running after the call returns.
                Err(DevmgrError::Cancelled)
            }
        }
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buffer).await;
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

fn terminate(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with a pid we spawned. EPERM from a child that
    // escalated to root is ignored.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

pub(crate) fn map_spawn_error(err: io::Error, command: &str) -> DevmgrError {
    if err.kind() == io::ErrorKind::NotFound {
        DevmgrError::CommandMissing {
            command: command.into(),
        }
    } else {
        DevmgrError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use scripted::{Reply, ScriptedRunner};

/// Scripted stand-in for [`SystemRunner`], built for unit tests and for
/// dependents that enable the `test-support` feature.
#[cfg(any(test, feature = "test-support"))]
mod scripted {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{CommandOutput, CommandRunner, CommandSpec};
    use crate::control::CancelToken;
    use crate::error::{DevmgrError, Result};

    /// Canned response for a [`ScriptedRunner`] rule.
    #[derive(Debug, Clone)]
    pub struct Reply {
        status: Option<i32>,
        stdout: String,
        stderr: String,
        hang: bool,
        missing: bool,
        provides: Option<String>,
        withdraws: Option<String>,
    }

    impl Reply {
        pub fn exit(code: i32) -> Self {
            Self {
                status: Some(code),
                stdout: String::new(),
                stderr: String::new(),
                hang: false,
                missing: false,
                provides: None,
                withdraws: None,
            }
        }

        /// Never finishes; resolves only through cancellation or a timeout.
        pub fn hang() -> Self {
            Self {
                hang: true,
                ..Self::exit(0)
            }
        }

        /// Behaves as if the program is not installed.
        pub fn missing() -> Self {
            Self {
                missing: true,
                ..Self::exit(127)
            }
        }

        pub fn stdout(mut self, text: impl Into<String>) -> Self {
            self.stdout = text.into();
            self
        }

        pub fn stderr(mut self, text: impl Into<String>) -> Self {
            self.stderr = text.into();
            self
        }

        /// Make `program` resolvable on PATH once this reply fires.
        pub fn provides(mut self, program: impl Into<String>) -> Self {
            self.provides = Some(program.into());
            self
        }

        /// Remove `program` from PATH once this reply fires.
        pub fn withdraws(mut self, program: impl Into<String>) -> Self {
            self.withdraws = Some(program.into());
            self
        }
    }

    /// Deterministic runner that records invocations and replays scripted replies.
    ///
    /// A rule matches when its tokens appear contiguously in the command's argv;
    /// the most recently added matching rule wins. Unmatched commands exit 0.
    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        programs: Mutex<HashSet<String>>,
        rules: Mutex<Vec<(Vec<String>, Reply)>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_programs(programs: &[&str]) -> Self {
            let runner = Self::new();
            for program in programs {
                runner.add_program(program);
            }
            runner
        }

        pub fn add_program(&self, program: &str) {
            if let Ok(mut programs) = self.programs.lock() {
                programs.insert(program.to_string());
            }
        }

        pub fn remove_program(&self, program: &str) {
            if let Ok(mut programs) = self.programs.lock() {
                programs.remove(program);
            }
        }

        pub fn on(&self, tokens: &[&str], reply: Reply) -> &Self {
            if let Ok(mut rules) = self.rules.lock() {
                rules.push((tokens.iter().map(|t| t.to_string()).collect(), reply));
            }
            self
        }

        /// Every command launched so far, in order.
        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
        }

        /// Number of recorded commands containing `tokens` contiguously.
        pub fn count_matching(&self, tokens: &[&str]) -> usize {
            self.calls()
                .iter()
                .filter(|spec| contains_run(&spec.argv(), tokens))
                .count()
        }

        fn reply_for(&self, spec: &CommandSpec) -> Reply {
            let argv = spec.argv();
            self.rules
                .lock()
                .ok()
                .and_then(|rules| {
                    rules
                        .iter()
                        .rev()
                        .find(|(tokens, _)| {
                            let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
                            contains_run(&argv, &tokens)
                        })
                        .map(|(_, reply)| reply.clone())
                })
                .unwrap_or_else(|| Reply::exit(0))
        }
    }

    fn contains_run(argv: &[&str], tokens: &[&str]) -> bool {
        tokens.is_empty() || argv.windows(tokens.len()).any(|window| window == tokens)
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec, cancel: &CancelToken) -> Result<CommandOutput> {
            cancel.check()?;
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(spec.clone());
            }
            let reply = self.reply_for(spec);
            if reply.missing {
                return Err(DevmgrError::CommandMissing {
                    command: spec.program.clone(),
                });
            }
            if reply.hang {
                cancel.cancelled().await;
                return Err(DevmgrError::Cancelled);
            }
            if let Some(program) = &reply.provides {
                self.add_program(program);
            }
            if let Some(program) = &reply.withdraws {
                self.remove_program(program);
            }
            Ok(CommandOutput {
                status: reply.status,
                stdout: reply.stdout,
                stderr: reply.stderr,
            })
        }

        fn which(&self, program: &str) -> bool {
            self.programs
                .lock()
                .map(|programs| programs.contains(program))
                .unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_display_and_argv() {
        let spec = CommandSpec::from_argv(vec!["sudo".into(), "pacman".into(), "-Sy".into()])
            .expect("argv");
        assert_eq!(spec.program, "sudo");
        assert_eq!(spec.display(), "sudo pacman -Sy");
        assert!(CommandSpec::from_argv(Vec::new()).is_none());
    }

    #[test]
    fn test_nonzero_exit_maps_to_failure() {
        let spec = CommandSpec::new("dpkg", ["-s", "vim"]);
        let output = CommandOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: "package 'vim' is not installed\n".into(),
        };
        match output.into_checked(&spec) {
            Err(DevmgrError::CommandFailure {
                command,
                status,
                stderr,
            }) => {
                assert_eq!(command, "dpkg -s vim");
                assert_eq!(status, 1);
                assert_eq!(stderr, "package 'vim' is not installed");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scripted_runner_prefers_latest_rule() {
        let runner = ScriptedRunner::with_programs(&["pacman"]);
        runner
            .on(&["pacman", "-Qi"], Reply::exit(1))
            .on(&["-Qi", "git"], Reply::exit(0));
        let cancel = CancelToken::new();

        let git = runner
            .run(&CommandSpec::new("pacman", ["-Qi", "git"]), &cancel)
            .await
            .expect("run");
        let vim = runner
            .run(&CommandSpec::new("pacman", ["-Qi", "vim"]), &cancel)
            .await
            .expect("run");

        assert!(git.success());
        assert!(!vim.success());
        assert_eq!(runner.count_matching(&["-Qi"]), 2);
        assert!(runner.which("pacman"));
        assert!(!runner.which("yay"));
    }

    #[tokio::test]
    async fn test_system_runner_reports_missing_binary() {
        let err = SystemRunner
            .run(
                &CommandSpec::new("devmgr-definitely-not-a-binary", Vec::<String>::new()),
                &CancelToken::new(),
            )
            .await
            .expect_err("spawn should fail");
        assert!(matches!(err, DevmgrError::CommandMissing { .. }));
    }
}
