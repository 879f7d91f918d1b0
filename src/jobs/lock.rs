//! Lease-backed mutual exclusion per task name.
//!
//! A lock key is created only while it has never existed (creation revision 0)
//! and is bound to a fresh lease. Releasing revokes the lease, which removes
//! the key; the key itself is never deleted directly.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::jobs::error::{JobError, JobResult};
use crate::store::{Compare, CoordinationStore, KeyLayout, LeaseId, Txn, TxnOp};

/// Creates one [`TaskLock`] per execution attempt.
#[derive(Clone)]
pub struct LockFactory {
    store: Arc<dyn CoordinationStore>,
    layout: KeyLayout,
    ttl: Duration,
}

impl LockFactory {
    pub fn new(store: Arc<dyn CoordinationStore>, layout: KeyLayout, ttl: Duration) -> Self {
        Self { store, layout, ttl }
    }

    pub fn create(&self, task_name: &str) -> TaskLock {
        TaskLock {
            store: Arc::clone(&self.store),
            key: self.layout.lock_key(task_name),
            ttl: self.ttl,
            held: None,
        }
    }
}

struct HeldLease {
    lease: LeaseId,
    renewal: CancellationToken,
}

pub struct TaskLock {
    store: Arc<dyn CoordinationStore>,
    key: String,
    ttl: Duration,
    held: Option<HeldLease>,
}

impl TaskLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Single acquisition attempt.
    ///
    /// Returns [`JobError::LockOccupied`] when another holder owns the key. On
    /// any failure the renewal is stopped and the lease revoked before return.
    pub async fn try_lock(&mut self) -> JobResult<()> {
        if self.held.is_some() {
            return Ok(());
        }

        let lease = self.store.grant_lease(self.ttl).await?;
        let renewal = CancellationToken::new();

        match self.acquire(lease, &renewal).await {
            Ok(()) => {
                tracing::debug!(key = %self.key, lease = %lease, "Lock acquired");
                self.held = Some(HeldLease { lease, renewal });
                Ok(())
            }
            Err(e) => {
                renewal.cancel();
                if let Err(revoke_err) = self.store.revoke_lease(lease).await {
                    tracing::warn!(
                        key = %self.key,
                        lease = %lease,
                        error = %revoke_err,
                        "Failed to revoke lease after unsuccessful lock attempt"
                    );
                }
                Err(e)
            }
        }
    }

    async fn acquire(&self, lease: LeaseId, renewal: &CancellationToken) -> JobResult<()> {
        let mut keep_alive = self.store.keep_alive(lease, renewal.clone()).await?;
        tokio::spawn(async move { while keep_alive.recv().await.is_some() {} });

        let txn = Txn::new()
            .when(Compare::absent(self.key.clone()))
            .and_then(TxnOp::Put {
                key: self.key.clone(),
                value: Vec::new(),
                lease: Some(lease),
            })
            .or_else(TxnOp::Get {
                key: self.key.clone(),
            });

        let response = self.store.txn(txn).await?;
        if response.succeeded {
            Ok(())
        } else {
            Err(JobError::LockOccupied)
        }
    }

    /// Idempotent; does nothing unless the lock is held.
    pub async fn unlock(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };

        held.renewal.cancel();
        match self.store.revoke_lease(held.lease).await {
            Ok(()) => tracing::debug!(key = %self.key, lease = %held.lease, "Lock released"),
            Err(e) => tracing::warn!(
                key = %self.key,
                lease = %held.lease,
                error = %e,
                "Failed to revoke lock lease"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn factory(store: &MemoryStore) -> LockFactory {
        LockFactory::new(
            Arc::new(store.clone()),
            KeyLayout::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_second_holder_is_rejected_until_release() {
        let store = MemoryStore::new();
        let locks = factory(&store);

        let mut first = locks.create("backup");
        let mut second = locks.create("backup");

        first.try_lock().await.unwrap();
        assert!(store.contains_key("/cron/lock/backup"));

        let err = second.try_lock().await.unwrap_err();
        assert!(err.is_lock_occupied());
        assert!(!second.is_held());
        // losing attempt must not leave its lease behind
        assert_eq!(store.lease_count(), 1);

        first.unlock().await;
        assert!(!store.contains_key("/cron/lock/backup"));
        assert_eq!(store.lease_count(), 0);

        let mut third = locks.create("backup");
        third.try_lock().await.unwrap();
        third.unlock().await;
    }

    #[tokio::test]
    async fn test_different_tasks_do_not_contend() {
        let store = MemoryStore::new();
        let locks = factory(&store);

        let mut a = locks.create("a");
        let mut b = locks.create("b");
        a.try_lock().await.unwrap();
        b.try_lock().await.unwrap();

        a.unlock().await;
        b.unlock().await;
        assert_eq!(store.lease_count(), 0);
    }

    #[tokio::test]
    async fn test_unlock_is_idempotent() {
        let store = MemoryStore::new();
        let locks = factory(&store);

        let mut never_locked = locks.create("t");
        never_locked.unlock().await;

        let mut lock = locks.create("t");
        lock.try_lock().await.unwrap();
        lock.unlock().await;
        lock.unlock().await;
        assert_eq!(store.lease_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attempts_have_single_winner() {
        let store = MemoryStore::new();
        let locks = factory(&store);

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let mut lock = locks.create("shared");
                tokio::spawn(async move {
                    let outcome = lock.try_lock().await;
                    (lock, outcome)
                })
            })
            .collect();

        let mut winners = Vec::new();
        for attempt in attempts {
            let (lock, outcome) = attempt.await.unwrap();
            match outcome {
                Ok(()) => winners.push(lock),
                Err(e) => assert!(e.is_lock_occupied(), "unexpected error: {e}"),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(store.lease_count(), 1);

        for mut lock in winners {
            lock.unlock().await;
        }
        assert_eq!(store.lease_count(), 0);
        assert!(!store.contains_key("/cron/lock/shared"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_lock_outlives_lease_ttl() {
        let store = MemoryStore::new();
        let locks = factory(&store);

        let mut lock = locks.create("long");
        lock.try_lock().await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.contains_key("/cron/lock/long"));

        lock.unlock().await;
        assert!(!store.contains_key("/cron/lock/long"));
    }
}
