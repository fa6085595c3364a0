//! Per-comic exclusive check-out registry.
//!
//! Batch steps check a comic out before touching its archive or its record
//! and check it back in once the record has been written. A comic id is held
//! by at most one worker at a time; other workers asking for the same id wait
//! until it is released. Different ids never block each other.

use crate::domain::model::ComicId;
use crate::domain::ports::FeatureFlags;
use crate::utils::error::{BatchError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Feature flag enabling exclusive check-outs.
pub const EXCLUSIVE_LOCK_FEATURE: &str = "batch.exclusive-lock";

#[derive(Default)]
struct Holders {
    // 每個 id 最多一筆；ticket 用來辨識是哪一個 check-out 持有它
    tickets: HashMap<ComicId, u64>,
    next_ticket: u64,
}

impl Holders {
    fn register(&mut self, id: ComicId) -> u64 {
        self.next_ticket += 1;
        self.tickets.insert(id, self.next_ticket);
        self.next_ticket
    }
}

struct Inner {
    holders: Mutex<Holders>,
    released: Condvar,
    released_async: Notify,
    flags: Arc<dyn FeatureFlags>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Holders> {
        // Holders is updated with single insert/remove calls, so a poisoned
        // lock still guards a consistent map.
        self.holders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: ComicId, ticket: Option<u64>) -> bool {
        let removed = {
            let mut holders = self.lock();
            let current = holders.tickets.get(&id).copied();
            match (current, ticket) {
                (Some(current), Some(ticket)) if current != ticket => false,
                (Some(_), _) => holders.tickets.remove(&id).is_some(),
                (None, _) => false,
            }
        };

        if removed {
            tracing::trace!("Comic {} checked in", id);
            self.released.notify_all();
            self.released_async.notify_waiters();
        }
        removed
    }
}

/// Shared registry of checked-out comics. Cloning is cheap and every clone
/// refers to the same registry.
#[derive(Clone)]
pub struct CheckOutRegistry {
    inner: Arc<Inner>,
}

impl CheckOutRegistry {
    pub fn new(flags: Arc<dyn FeatureFlags>) -> Self {
        Self {
            inner: Arc::new(Inner {
                holders: Mutex::new(Holders::default()),
                released: Condvar::new(),
                released_async: Notify::new(),
                flags,
            }),
        }
    }

    pub fn exclusive_lock_enabled(&self) -> bool {
        self.inner.flags.is_feature_enabled(EXCLUSIVE_LOCK_FEATURE)
    }

    /// Checks `id` out, blocking the current thread while another holder has
    /// it. Returns immediately without registering when the exclusive lock
    /// feature is disabled.
    ///
    /// Blocks an OS thread; async callers use [`check_out_async`](Self::check_out_async).
    pub fn check_out(&self, id: ComicId) -> CheckOut {
        if !self.exclusive_lock_enabled() {
            return CheckOut::unregistered(id);
        }

        let holders = self.inner.lock();
        let mut holders = self
            .inner
            .released
            .wait_while(holders, |holders| holders.tickets.contains_key(&id))
            .unwrap_or_else(PoisonError::into_inner);
        let ticket = holders.register(id);
        tracing::trace!("Comic {} checked out", id);
        self.registered(id, ticket)
    }

    /// Like [`check_out`](Self::check_out) but gives up after `timeout`.
    pub fn check_out_timeout(&self, id: ComicId, timeout: Duration) -> Result<CheckOut> {
        if !self.exclusive_lock_enabled() {
            return Ok(CheckOut::unregistered(id));
        }

        let holders = self.inner.lock();
        let (mut holders, _) = self
            .inner
            .released
            .wait_timeout_while(holders, timeout, |holders| {
                holders.tickets.contains_key(&id)
            })
            .unwrap_or_else(PoisonError::into_inner);

        if holders.tickets.contains_key(&id) {
            tracing::debug!("Gave up checking out comic {} after {:?}", id, timeout);
            return Err(BatchError::CheckOutTimeout {
                id,
                waited: timeout,
            });
        }

        let ticket = holders.register(id);
        tracing::trace!("Comic {} checked out", id);
        Ok(self.registered(id, ticket))
    }

    /// Async check-out: suspends the task, not the worker thread, while the
    /// comic is held elsewhere. Dropping the future while it waits leaves the
    /// registry untouched.
    pub async fn check_out_async(&self, id: ComicId) -> CheckOut {
        if !self.exclusive_lock_enabled() {
            return CheckOut::unregistered(id);
        }

        loop {
            // 先登記等待，再檢查狀態，避免錯過中間發生的 check-in
            let released = self.inner.released_async.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(ticket) = self.try_register(id) {
                tracing::trace!("Comic {} checked out", id);
                return self.registered(id, ticket);
            }

            tracing::trace!("Comic {} is checked out elsewhere, waiting", id);
            released.await;
        }
    }

    pub async fn check_out_async_timeout(&self, id: ComicId, timeout: Duration) -> Result<CheckOut> {
        tokio::time::timeout(timeout, self.check_out_async(id))
            .await
            .map_err(|_| {
                tracing::debug!("Gave up checking out comic {} after {:?}", id, timeout);
                BatchError::CheckOutTimeout {
                    id,
                    waited: timeout,
                }
            })
    }

    /// Releases `id` regardless of who checked it out and wakes its waiters.
    /// Does nothing when `id` is not checked out.
    pub fn check_in(&self, id: ComicId) {
        self.inner.release(id, None);
    }

    pub fn is_checked_out(&self, id: ComicId) -> bool {
        self.inner.lock().tickets.contains_key(&id)
    }

    /// Currently checked-out ids in ascending order.
    pub fn checked_out(&self) -> Vec<ComicId> {
        let mut ids: Vec<ComicId> = self.inner.lock().tickets.keys().copied().collect();
        ids.sort();
        ids
    }

    fn try_register(&self, id: ComicId) -> Option<u64> {
        let mut holders = self.inner.lock();
        if holders.tickets.contains_key(&id) {
            None
        } else {
            Some(holders.register(id))
        }
    }

    fn registered(&self, id: ComicId, ticket: u64) -> CheckOut {
        CheckOut {
            id,
            holder: Some((Arc::clone(&self.inner), ticket)),
        }
    }
}

impl std::fmt::Debug for CheckOutRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckOutRegistry")
            .field("checked_out", &self.checked_out())
            .finish()
    }
}

/// A checked-out comic. The comic is checked back in when this is dropped.
///
/// A check-out taken while the exclusive lock feature was disabled holds
/// nothing and releases nothing.
#[must_use = "dropping a CheckOut checks the comic back in immediately"]
pub struct CheckOut {
    id: ComicId,
    holder: Option<(Arc<Inner>, u64)>,
}

impl CheckOut {
    fn unregistered(id: ComicId) -> Self {
        Self { id, holder: None }
    }

    pub fn id(&self) -> ComicId {
        self.id
    }

    pub fn is_exclusive(&self) -> bool {
        self.holder.is_some()
    }

    pub fn check_in(self) {}
}

impl Drop for CheckOut {
    fn drop(&mut self) {
        if let Some((inner, ticket)) = self.holder.take() {
            // 若 id 已被強制 check-in 並由他人重新取得，不可釋放別人的鎖
            inner.release(self.id, Some(ticket));
        }
    }
}

impl std::fmt::Debug for CheckOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckOut")
            .field("id", &self.id)
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::flags::RuntimeFeatureFlags;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use tokio_test::{assert_pending, assert_ready};

    fn registry(enabled: bool) -> (CheckOutRegistry, Arc<RuntimeFeatureFlags>) {
        let flags = Arc::new(RuntimeFeatureFlags::new().with(EXCLUSIVE_LOCK_FEATURE, enabled));
        (CheckOutRegistry::new(flags.clone()), flags)
    }

    #[test]
    fn test_second_check_out_waits_for_check_in() {
        let (registry, _) = registry(true);
        let id = ComicId(717);

        let first = registry.check_out(id);
        assert!(registry.is_checked_out(id));

        let (acquired_tx, acquired_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let other = registry.clone();
        let waiter = thread::spawn(move || {
            let second = other.check_out(id);
            acquired_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            drop(second);
        });

        // B must still be blocked while A holds the comic
        assert!(acquired_rx.recv_timeout(Duration::from_millis(150)).is_err());

        drop(first);
        acquired_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(registry.checked_out(), vec![id]);

        release_tx.send(()).unwrap();
        waiter.join().unwrap();
        assert!(!registry.is_checked_out(id));
    }

    #[test]
    fn test_check_in_unknown_id_is_noop() {
        let (registry, _) = registry(true);
        let held = registry.check_out(ComicId(1));

        registry.check_in(ComicId(2));
        registry.check_in(ComicId(2));

        assert_eq!(registry.checked_out(), vec![ComicId(1)]);
        drop(held);
        assert!(registry.checked_out().is_empty());
    }

    #[test]
    fn test_disabled_feature_never_registers_or_blocks() {
        let (registry, _) = registry(false);
        let id = ComicId(717);

        let first = registry.check_out(id);
        let second = registry.check_out(id);

        assert!(!first.is_exclusive());
        assert!(!second.is_exclusive());
        assert!(!registry.is_checked_out(id));
        assert!(registry.check_out_timeout(id, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_feature_toggle_applies_to_next_check_out() {
        let (registry, flags) = registry(false);
        let id = ComicId(3);

        let unlocked = registry.check_out(id);
        assert!(!registry.is_checked_out(id));

        flags.set(EXCLUSIVE_LOCK_FEATURE, true);
        let locked = registry.check_out(id);
        assert!(locked.is_exclusive());
        assert!(registry.is_checked_out(id));

        drop(unlocked);
        assert!(registry.is_checked_out(id));
        drop(locked);
        assert!(!registry.is_checked_out(id));
    }

    #[test]
    fn test_different_ids_do_not_block() {
        let (registry, _) = registry(true);
        let _a = registry.check_out(ComicId(1));
        let _b = registry
            .check_out_timeout(ComicId(2), Duration::from_millis(10))
            .unwrap();

        assert_eq!(registry.checked_out(), vec![ComicId(1), ComicId(2)]);
    }

    #[test]
    fn test_check_out_timeout_gives_up() {
        let (registry, _) = registry(true);
        let _held = registry.check_out(ComicId(9));

        let result = registry.check_out_timeout(ComicId(9), Duration::from_millis(50));

        assert!(matches!(
            result,
            Err(BatchError::CheckOutTimeout { id: ComicId(9), .. })
        ));
        assert_eq!(registry.checked_out(), vec![ComicId(9)]);
    }

    #[test]
    fn test_panicking_holder_releases_comic() {
        let (registry, _) = registry(true);
        let other = registry.clone();

        let result = thread::spawn(move || {
            let _held = other.check_out(ComicId(5));
            panic!("archive exploded");
        })
        .join();

        assert!(result.is_err());
        assert!(!registry.is_checked_out(ComicId(5)));
    }

    #[test]
    fn test_stale_check_out_does_not_release_new_holder() {
        let (registry, _) = registry(true);
        let id = ComicId(11);

        let stale = registry.check_out(id);
        registry.check_in(id);
        let current = registry.check_out(id);

        drop(stale);
        assert!(registry.is_checked_out(id));
        drop(current);
        assert!(!registry.is_checked_out(id));
    }

    #[test]
    fn test_only_one_holder_at_a_time() {
        let (registry, _) = registry(true);
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _held = registry.check_out(ComicId(42));
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(registry.checked_out().is_empty());
    }

    #[test]
    fn test_async_check_out_wakes_on_check_in() {
        let (registry, _) = registry(true);
        let id = ComicId(717);
        let held = registry.check_out(id);

        let mut waiting = tokio_test::task::spawn(registry.check_out_async(id));
        assert_pending!(waiting.poll());

        drop(held);
        assert!(waiting.is_woken());
        let acquired = assert_ready!(waiting.poll());
        assert!(acquired.is_exclusive());
        assert_eq!(registry.checked_out(), vec![id]);
    }

    #[test]
    fn test_dropped_async_wait_leaves_registry_untouched() {
        let (registry, _) = registry(true);
        let held = registry.check_out(ComicId(8));

        let mut waiting = tokio_test::task::spawn(registry.check_out_async(ComicId(8)));
        assert_pending!(waiting.poll());
        drop(waiting);

        drop(held);
        assert!(registry.checked_out().is_empty());
    }

    #[tokio::test]
    async fn test_async_timeout_gives_up() {
        let (registry, _) = registry(true);
        let _held = registry.check_out_async(ComicId(4)).await;

        let result = registry
            .check_out_async_timeout(ComicId(4), Duration::from_millis(30))
            .await;

        assert!(matches!(result, Err(BatchError::CheckOutTimeout { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_holders_are_serialized() {
        let (registry, _) = registry(true);
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..16 {
            let registry = registry.clone();
            let inside = inside.clone();
            tasks.spawn(async move {
                let _held = registry.check_out_async(ComicId(1)).await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            });
        }

        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
        assert!(registry.checked_out().is_empty());
    }
}
