// ── Per-target write serialization ──
//
// A Set holds its target's guard from the first store lookup until the
// collector is reconciled, so deciding that an entry is empty and
// removing it can never interleave with another write to that target.
// A guard's map slot is removed by the last holder.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::TargetId;

#[derive(Debug, Default)]
pub(super) struct TargetLocks {
    locks: Arc<DashMap<TargetId, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    /// Wait for exclusive write access to `target`.
    pub(super) async fn acquire(&self, target: &TargetId) -> TargetGuard {
        let lock = Arc::clone(self.locks.entry(target.clone()).or_default().value());
        let guard = Arc::clone(&lock).lock_owned().await;
        TargetGuard {
            locks: Arc::clone(&self.locks),
            target: target.clone(),
            lock,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(super) struct TargetGuard {
    locks: Arc<DashMap<TargetId, Arc<Mutex<()>>>>,
    target: TargetId,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Map slot plus `self.lock`: nobody else waits on this target.
        self.locks.remove_if(&self.target, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn released_guard_frees_its_slot() {
        let locks = TargetLocks::default();
        let target = TargetId::new("default/leaf1");
        let guard = locks.acquire(&target).await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn second_writer_waits_for_the_first() {
        let locks = Arc::new(TargetLocks::default());
        let target = TargetId::new("default/leaf1");
        let first = locks.acquire(&target).await;

        let waiter = tokio::spawn({
            let locks = Arc::clone(&locks);
            let target = target.clone();
            async move {
                let _guard = locks.acquire(&target).await;
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // The waiter holds a clone, so the slot outlives the first guard.
        drop(first);
        assert_eq!(locks.len(), 1);
        tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn targets_do_not_block_each_other() {
        let locks = TargetLocks::default();
        let _a = locks.acquire(&TargetId::new("default/leaf1")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(&TargetId::new("default/leaf2")),
        )
        .await;
        assert!(b.is_ok());
    }
}
