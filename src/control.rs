/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core::control
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Cancellation tokens for background workers and the
    process-wide lock that serialises package mutations.

  Security / Safety Notes:
    Holding the mutation lock is the only way to reach the
    lock-held backend entry points.

  Dependencies:
    tokio::sync (watch, Mutex).

  Operational Scope:
    Shared by the backend, AUR helper manager, source builder
    and worker spawners.

  Revision History:
    2025-11-02 COD  Introduced worker control primitives.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Mutations never race on the package database
    - Cancellation is observable without polling
============================================================*/

use std::sync::Arc;

use tokio::sync::{watch, Mutex, OwnedMutexGuard};

use crate::error::{DevmgrError, Result};

/// Cloneable cancellation flag handed to every worker.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Request cancellation; idempotent.
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolve once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives as long as `self`, so this only returns on cancellation.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Fail fast with `Cancelled` when cancellation has already been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DevmgrError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide lock serialising install/remove/upgrade/bootstrap operations.
#[derive(Clone, Debug, Default)]
pub struct MutationLock {
    inner: Arc<Mutex<()>>,
}

/// Proof that the mutation lock is held.
#[derive(Debug)]
pub struct MutationGuard {
    _guard: OwnedMutexGuard<()>,
}

impl MutationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock, giving up if the token is cancelled first.
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<MutationGuard> {
        cancel.check()?;
        tokio::select! {
            guard = self.inner.clone().lock_owned() => Ok(MutationGuard { _guard: guard }),
            _ = cancel.cancelled() => Err(DevmgrError::Cancelled),
        }
    }

    /// True when some operation currently holds the lock.
    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter woke")
            .expect("join");
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(DevmgrError::Cancelled)));
    }

    #[tokio::test]
    async fn test_lock_serialises_and_honours_cancel() {
        let lock = MutationLock::new();
        let held = lock.acquire(&CancelToken::new()).await.expect("first acquire");
        assert!(lock.is_busy());

        let cancel = CancelToken::new();
        let contender = {
            let lock = lock.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { lock.acquire(&cancel).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let outcome = contender.await.expect("join");
        assert!(matches!(outcome, Err(DevmgrError::Cancelled)));

        drop(held);
        assert!(!lock.is_busy());
    }
}
