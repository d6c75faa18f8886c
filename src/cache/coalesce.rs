use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as FetchLock, OwnedMutexGuard};

#[derive(Debug)]
struct Slot {
    lock: Arc<FetchLock<()>>,
    /// Holders plus waiters.
    users: usize,
}

/// Serializes fetches per key so concurrent misses issue one request.
#[derive(Debug, Default)]
pub(crate) struct FetchCoalescer {
    inflight: Mutex<HashMap<String, Slot>>,
}

impl FetchCoalescer {
    fn slots_mut(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive use of `key`.
    ///
    /// The slot is released when the permit drops, including when the waiting future itself
    /// is dropped before the permit is handed out.
    pub(crate) async fn acquire(&self, key: &str) -> FetchPermit<'_> {
        let lock = {
            let mut inflight = self.slots_mut();
            let slot = inflight.entry(key.to_owned()).or_insert_with(|| Slot {
                lock: Arc::new(FetchLock::new(())),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.lock)
        };
        let mut permit = FetchPermit {
            coalescer: self,
            key: key.to_owned(),
            guard: None,
        };
        permit.guard = Some(lock.lock_owned().await);
        permit
    }

    fn leave(&self, key: &str) {
        let mut inflight = self.slots_mut();
        if let Some(slot) = inflight.get_mut(key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                inflight.remove(key);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn slots(&self) -> usize {
        self.slots_mut().len()
    }
}

/// Exclusive fetch right for one key.
pub(crate) struct FetchPermit<'a> {
    coalescer: &'a FetchCoalescer,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FetchPermit<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.coalescer.leave(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slot_is_released_after_last_holder() {
        let coalescer = FetchCoalescer::default();
        let permit = coalescer.acquire("a").await;
        assert_eq!(coalescer.slots(), 1);
        drop(permit);
        assert_eq!(coalescer.slots(), 0);
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let coalescer = Arc::new(FetchCoalescer::default());
        let permit = coalescer.acquire("a").await;
        let other = Arc::clone(&coalescer);
        let waiter = tokio::spawn(async move {
            let _permit = other.acquire("a").await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(permit);
        waiter.await.unwrap();
        assert_eq!(coalescer.slots(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_slot() {
        let coalescer = Arc::new(FetchCoalescer::default());
        let permit = coalescer.acquire("a").await;
        let other = Arc::clone(&coalescer);
        let waiter = tokio::spawn(async move {
            let _permit = other.acquire("a").await;
        });
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(coalescer.slots(), 1);

        drop(permit);
        assert_eq!(coalescer.slots(), 0);
    }
}
