//! Per-key async locks.
//!
//! A key's entry lives only while someone holds or waits for its lock. The
//! entry is removed when the last guard drops, including when the holder's
//! future is cancelled.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub(crate) struct KeyedLocks {
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn gate(&self, key: &str) -> Arc<Mutex<()>> {
        self.gates
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Take the lock only if nobody holds it.
    pub(crate) fn try_lock(&self, key: &str) -> Option<KeyedGuard<'_>> {
        let gate = self.gate(key);
        match gate.try_lock_owned() {
            Ok(guard) => Some(self.guard(key, guard)),
            Err(_) => {
                self.forget_if_idle(key);
                None
            }
        }
    }

    pub(crate) async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let guard = self.gate(key).lock_owned().await;
        self.guard(key, guard)
    }

    /// Wait at most `wait` for the lock.
    pub(crate) async fn lock_timeout(&self, key: &str, wait: Duration) -> Option<KeyedGuard<'_>> {
        let gate = self.gate(key);
        match tokio::time::timeout(wait, gate.lock_owned()).await {
            Ok(guard) => Some(self.guard(key, guard)),
            Err(_) => {
                self.forget_if_idle(key);
                None
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.gates.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    fn guard(&self, key: &str, guard: OwnedMutexGuard<()>) -> KeyedGuard<'_> {
        KeyedGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    // the map's own reference is the only one left
    fn forget_if_idle(&self, key: &str) {
        self.gates
            .remove_if(key, |_, gate| Arc::strong_count(gate) == 1);
    }
}

/// Held lock for one key. Dropping it unlocks and, if nobody is waiting,
/// removes the key's entry.
pub(crate) struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.forget_if_idle(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entry_is_removed_with_last_guard() {
        let locks = KeyedLocks::new();
        let guard = locks.try_lock("a").unwrap();
        assert!(locks.try_lock("a").is_none());
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = locks.lock_timeout("b", Duration::from_millis(10)).await;
        assert!(b.is_some());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_waiter_leaves_holder_entry_alone() {
        let locks = KeyedLocks::new();
        let held = locks.lock("a").await;
        assert!(locks.lock_timeout("a", Duration::from_millis(50)).await.is_none());
        assert_eq!(locks.len(), 1);
        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn cancelled_holder_releases_entry() {
        let locks = KeyedLocks::new();
        let pending = async {
            let _guard = locks.lock("a").await;
            std::future::pending::<()>().await;
        };
        let _ = tokio::time::timeout(Duration::from_millis(5), pending).await;
        assert!(locks.is_empty());
    }
}
