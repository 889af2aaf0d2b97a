/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::batch
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Apply one install or remove action to an ordered list of
    packages, recording a per-package outcome.

  Security / Safety Notes:
    Packages already in the target state are never handed to
    the package manager again.

  Dependencies:
    async-trait for the batch target seam, serde for results.

  Operational Scope:
    Backs package, pack and AUR batch workers.

  Revision History:
    2025-11-02 COD  Authored batch executor.
  ------------------------------------------------------------
  SSE Principles Observed:
    - No fail-fast: every item is attempted
    - Input order preserved in outcomes and messages
============================================================*/

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::aur::AurHelperManager;
use crate::backend::PackageBackend;
use crate::control::CancelToken;
use crate::error::{OperationResult, Result};

/// Batch-capable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
    Install,
    Remove,
}

impl BatchAction {
    fn past_tense(self) -> &'static str {
        match self {
            BatchAction::Install => "installed",
            BatchAction::Remove => "removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum ItemOutcome {
    Success,
    /// Target state already held; the backend was not called.
    Skipped,
    Failed(String),
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemOutcome::Success => f.write_str("ok"),
            ItemOutcome::Skipped => f.write_str("skipped"),
            ItemOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub package: String,
    pub outcome: ItemOutcome,
}

/// One user-initiated batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub action: BatchAction,
    pub packages: Vec<String>,
}

impl BatchJob {
    pub fn new<I, S>(action: BatchAction, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action,
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub action: BatchAction,
    pub items: Vec<ItemReport>,
    pub overall_success: bool,
    pub cancelled: bool,
    pub message: String,
}

impl BatchResult {
    pub fn failed(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Failed(_)))
            .map(|item| item.package.as_str())
            .collect()
    }

    pub fn skipped_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.outcome == ItemOutcome::Skipped)
            .count()
    }
}

impl From<&BatchResult> for OperationResult {
    fn from(result: &BatchResult) -> Self {
        OperationResult {
            success: result.overall_success,
            message: result.message.clone(),
        }
    }
}

/// Anything a batch can install into or remove from.
#[async_trait]
pub trait BatchTarget: Send + Sync {
    async fn is_installed(&self, package: &str, cancel: &CancelToken) -> bool;
    async fn install(&self, package: &str, cancel: &CancelToken) -> Result<()>;
    async fn remove(&self, package: &str, cancel: &CancelToken) -> Result<()>;
}

#[async_trait]
impl BatchTarget for PackageBackend {
    async fn is_installed(&self, package: &str, cancel: &CancelToken) -> bool {
        PackageBackend::is_installed(self, package, cancel).await
    }

    async fn install(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        PackageBackend::install(self, package, cancel).await
    }

    async fn remove(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        PackageBackend::remove(self, package, cancel).await
    }
}

#[async_trait]
impl BatchTarget for AurHelperManager {
    async fn is_installed(&self, package: &str, cancel: &CancelToken) -> bool {
        self.is_package_installed(package, cancel).await
    }

    async fn install(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.install_package(package, cancel).await
    }

    async fn remove(&self, package: &str, cancel: &CancelToken) -> Result<()> {
        self.remove_package(package, cancel).await
    }
}

/// Run `job` against `target`, reporting `(percent, label)` before each item
/// and `(100, "Done")` at the end.
///
/// Once `cancel` fires, the remaining items are recorded as failed without
/// being attempted.
pub async fn run_batch<T, F>(
    target: &T,
    job: &BatchJob,
    cancel: &CancelToken,
    mut progress: F,
) -> BatchResult
where
    T: BatchTarget + ?Sized,
    F: FnMut(u8, &str) + Send,
{
    let total = job.packages.len();
    let mut items = Vec::with_capacity(total);

    for (index, package) in job.packages.iter().enumerate() {
        progress(percent(index, total), package.as_str());

        let outcome = if cancel.is_cancelled() {
            ItemOutcome::Failed("cancelled".into())
        } else {
            apply(target, job.action, package, cancel).await
        };
        items.push(ItemReport {
            package: package.clone(),
            outcome,
        });
    }
    progress(100, "Done");

    summarise(job.action, items, cancel.is_cancelled())
}

async fn apply<T>(
    target: &T,
    action: BatchAction,
    package: &str,
    cancel: &CancelToken,
) -> ItemOutcome
where
    T: BatchTarget + ?Sized,
{
    let installed = target.is_installed(package, cancel).await;
    let result = match (action, installed) {
        (BatchAction::Install, true) | (BatchAction::Remove, false) => {
            return ItemOutcome::Skipped;
        }
        (BatchAction::Install, false) => target.install(package, cancel).await,
        (BatchAction::Remove, true) => target.remove(package, cancel).await,
    };
    match result {
        Ok(()) => ItemOutcome::Success,
        Err(err) => ItemOutcome::Failed(err.to_string()),
    }
}

fn percent(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    u8::try_from(index * 100 / total).unwrap_or(100)
}

fn summarise(action: BatchAction, items: Vec<ItemReport>, cancelled: bool) -> BatchResult {
    let failed: Vec<&str> = items
        .iter()
        .filter(|item| matches!(item.outcome, ItemOutcome::Failed(_)))
        .map(|item| item.package.as_str())
        .collect();

    let message = if failed.is_empty() {
        format!(
            "Successfully {} {} packages",
            action.past_tense(),
            items.len()
        )
    } else {
        let prefix = if cancelled { "Cancelled; completed" } else { "Completed" };
        format!(
            "{prefix} with {} failures: {}",
            failed.len(),
            failed.join(", ")
        )
    };
    let overall_success = failed.is_empty();

    BatchResult {
        action,
        items,
        overall_success,
        cancelled,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DevmgrError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeTarget {
        installed: HashSet<String>,
        broken: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTarget {
        fn new(installed: &[&str], broken: &[&str]) -> Self {
            Self {
                installed: installed.iter().map(|s| s.to_string()).collect(),
                broken: broken.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn mutate(&self, package: &str) -> Result<()> {
            self.calls.lock().expect("calls").push(package.to_string());
            if self.broken.contains(package) {
                Err(DevmgrError::CommandFailure {
                    command: format!("fake {package}"),
                    status: 1,
                    stderr: "boom".into(),
                })
            } else {
                Ok(())
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("calls").len()
        }
    }

    #[async_trait]
    impl BatchTarget for FakeTarget {
        async fn is_installed(&self, package: &str, _cancel: &CancelToken) -> bool {
            self.installed.contains(package)
        }

        async fn install(&self, package: &str, _cancel: &CancelToken) -> Result<()> {
            self.mutate(package)
        }

        async fn remove(&self, package: &str, _cancel: &CancelToken) -> Result<()> {
            self.mutate(package)
        }
    }

    #[tokio::test]
    async fn test_skips_satisfied_items_and_invokes_rest() {
        let target = FakeTarget::new(&["git", "curl"], &[]);
        let job = BatchJob::new(BatchAction::Install, ["git", "nodejs", "curl", "nginx"]);
        let result = run_batch(&target, &job, &CancelToken::new(), |_, _| {}).await;

        assert_eq!(result.skipped_count(), 2);
        assert_eq!(target.call_count(), 2);
        assert!(result.overall_success);
        assert_eq!(result.message, "Successfully installed 4 packages");
    }

    #[tokio::test]
    async fn test_remove_skips_absent_packages() {
        let target = FakeTarget::new(&["vim"], &[]);
        let job = BatchJob::new(BatchAction::Remove, ["vim", "emacs"]);
        let result = run_batch(&target, &job, &CancelToken::new(), |_, _| {}).await;
        assert_eq!(result.items[0].outcome, ItemOutcome::Success);
        assert_eq!(result.items[1].outcome, ItemOutcome::Skipped);
        assert_eq!(target.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_processing() {
        let target = FakeTarget::new(&[], &["redis", "docker"]);
        let job = BatchJob::new(BatchAction::Install, ["redis", "git", "docker", "wget"]);
        let result = run_batch(&target, &job, &CancelToken::new(), |_, _| {}).await;

        assert_eq!(target.call_count(), 4);
        assert!(!result.overall_success);
        assert_eq!(result.failed(), ["redis", "docker"]);
        assert_eq!(result.message, "Completed with 2 failures: redis, docker");
        assert!(!OperationResult::from(&result).success);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let target = FakeTarget::new(&[], &[]);
        let job = BatchJob::new(BatchAction::Install, ["a", "b", "c", "d"]);
        let mut events = Vec::new();
        run_batch(&target, &job, &CancelToken::new(), |percent, label| {
            events.push((percent, label.to_string()))
        })
        .await;
        let expected: Vec<(u8, String)> = [(0, "a"), (25, "b"), (50, "c"), (75, "d"), (100, "Done")]
            .into_iter()
            .map(|(p, l)| (p, l.to_string()))
            .collect();
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn test_cancelled_batch_marks_remaining_failed() {
        let target = FakeTarget::new(&[], &[]);
        let job = BatchJob::new(BatchAction::Install, ["a", "b", "c"]);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let result = run_batch(&target, &job, &cancel, move |_, label| {
            if label == "b" {
                trigger.cancel();
            }
        })
        .await;

        assert_eq!(target.call_count(), 1);
        assert!(result.cancelled);
        assert_eq!(result.failed(), ["b", "c"]);
        assert!(result.message.starts_with("Cancelled"));
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds() {
        let target = FakeTarget::new(&[], &[]);
        let job = BatchJob::new(BatchAction::Remove, Vec::<String>::new());
        let result = run_batch(&target, &job, &CancelToken::new(), |_, _| {}).await;
        assert!(result.overall_success);
        assert!(result.items.is_empty());
    }
}
