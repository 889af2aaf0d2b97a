/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::worker
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Run long operations on background tasks and stream their
    progress and completion back to the caller.

  Security / Safety Notes:
    Workers share no mutable state; everything they report
    travels over their own channel.

  Dependencies:
    tokio (spawn, mpsc) for task and event plumbing.

  Operational Scope:
    One worker per user-initiated batch, search or bootstrap.

  Revision History:
    2025-11-02 COD  Authored worker plumbing.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Caller never blocks on a package manager
    - Every worker ends with exactly one completion event
    - Cancellation reaches the child process
============================================================*/

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::aur::AurHelperManager;
use crate::batch::{run_batch, BatchJob, BatchResult, BatchTarget};
use crate::control::CancelToken;
use crate::environment::HelperState;
use crate::error::{DevmgrError, OperationResult, Result};
use crate::search::PackageRecord;

/// Event streamed from a worker to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Progress { percent: u8, label: String },
    Finished(OperationResult),
}

/// Values a worker can describe in its completion event.
pub trait WorkerOutput {
    fn summary(&self) -> OperationResult;
}

impl WorkerOutput for String {
    fn summary(&self) -> OperationResult {
        OperationResult::ok(self.clone())
    }
}

impl WorkerOutput for BatchResult {
    fn summary(&self) -> OperationResult {
        OperationResult::from(self)
    }
}

impl WorkerOutput for Vec<PackageRecord> {
    fn summary(&self) -> OperationResult {
        OperationResult::ok(format!("Found {} packages", self.len()))
    }
}

impl WorkerOutput for HelperState {
    fn summary(&self) -> OperationResult {
        OperationResult::ok(format!("Active AUR helper: {self}"))
    }
}

/// Sending half handed to the work closure.
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ProgressReporter {
    pub fn progress(&self, percent: u8, label: impl Into<String>) {
        // A caller that dropped its receiver is no longer interested.
        let _ = self.tx.send(WorkerEvent::Progress {
            percent: percent.min(100),
            label: label.into(),
        });
    }

    fn finished(&self, result: OperationResult) {
        let _ = self.tx.send(WorkerEvent::Finished(result));
    }
}

/// Caller-side handle to a running worker.
pub struct WorkerHandle<T> {
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    cancel: CancelToken,
    task: JoinHandle<Result<T>>,
}

impl<T> WorkerHandle<T> {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask the worker to stop; its child process is signalled.
    ///
    /// A child already running as root under pkexec or sudo cannot be
    /// signalled from here and runs to completion on its own. The worker
    /// still reports `Cancelled` and releases the mutation lock.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, or `None` once the worker has finished and the queue is drained.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Drain every event into `observe`, then return the worker's value.
    pub async fn wait_with<F>(mut self, mut observe: F) -> Result<T>
    where
        F: FnMut(&WorkerEvent),
    {
        while let Some(event) = self.events.recv().await {
            observe(&event);
        }
        self.join().await
    }

    pub async fn join(self) -> Result<T> {
        self.task
            .await
            .map_err(|err| DevmgrError::Runtime(format!("Worker task failed: {err}")))?
    }
}

/// Spawn `work` on the runtime with a fresh cancellation token.
pub fn spawn_worker<T, F, Fut>(work: F) -> WorkerHandle<T>
where
    T: WorkerOutput + Send + 'static,
    F: FnOnce(ProgressReporter, CancelToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let (tx, events) = mpsc::unbounded_channel();
    let cancel = CancelToken::new();
    let reporter = ProgressReporter { tx };
    let future = work(reporter.clone(), cancel.clone());

    let task = tokio::spawn(async move {
        let result = future.await;
        let completion = match &result {
            Ok(value) => value.summary(),
            Err(err) => OperationResult::failed(err.to_string()),
        };
        reporter.finished(completion);
        result
    });

    WorkerHandle {
        events,
        cancel,
        task,
    }
}

/// Run a batch job in the background.
pub fn spawn_batch<T>(target: T, job: BatchJob) -> WorkerHandle<BatchResult>
where
    T: BatchTarget + 'static,
{
    spawn_worker(move |reporter, cancel| async move {
        let result = run_batch(&target, &job, &cancel, |percent, label| {
            reporter.progress(percent, label)
        })
        .await;
        Ok(result)
    })
}

/// Search the AUR in the background.
pub fn spawn_search(manager: AurHelperManager, query: String) -> WorkerHandle<Vec<PackageRecord>> {
    spawn_worker(move |reporter, cancel| async move {
        reporter.progress(0, format!("Searching for {query}"));
        let records = manager.search(&query, &cancel).await?;
        reporter.progress(100, "Done");
        Ok(records)
    })
}

/// Bootstrap an AUR helper in the background.
pub fn spawn_bootstrap(manager: AurHelperManager, helper: String) -> WorkerHandle<HelperState> {
    spawn_worker(move |reporter, cancel| async move {
        let stages = reporter.clone();
        let state = manager
            .install_helper(&helper, &cancel, move |stage| {
                stages.progress(stage.percent(), stage.label())
            })
            .await?;
        reporter.progress(100, "Done");
        Ok(state)
    })
}
