use crate::models::{now_millis, PageLock, Timestamp};
use rustc_hash::FxHashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tracks edit locks, one per page name.
pub struct PageLockManager {
    locks: Mutex<FxHashMap<String, PageLock>>,
    expiry: Duration,
}

impl PageLockManager {
    pub fn new(expiry: Duration) -> Self {
        Self {
            locks: Mutex::new(FxHashMap::default()),
            expiry,
        }
    }

    fn guard(&self) -> MutexGuard<'_, FxHashMap<String, PageLock>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `None` when the page already carries a live lock.
    pub fn lock_page(&self, page: &str, user: &str) -> Option<PageLock> {
        let now = now_millis();
        let mut locks = self.guard();
        if let Some(existing) = locks.get(page) {
            if !existing.is_expired(now) {
                debug!(page = page, holder = %existing.locker, "Page already locked");
                return None;
            }
        }
        let lock = PageLock {
            page: page.to_string(),
            locker: user.to_string(),
            acquired: now,
            expiry: now + self.expiry.as_millis() as Timestamp,
        };
        locks.insert(page.to_string(), lock.clone());
        debug!(page = page, user = user, "Page locked");
        Some(lock)
    }

    /// Releases `lock` if it is still the one held on its page.
    pub fn unlock_page(&self, lock: &PageLock) -> bool {
        let mut locks = self.guard();
        match locks.get(&lock.page) {
            Some(current) if current == lock => {
                locks.remove(&lock.page);
                debug!(page = %lock.page, "Page unlocked");
                true
            }
            _ => false,
        }
    }

    /// Drops whatever lock is held on `page`, returning it.
    pub fn force_unlock(&self, page: &str) -> Option<PageLock> {
        let removed = self.guard().remove(page);
        if let Some(lock) = &removed {
            warn!(
                page = page,
                holder = %lock.locker,
                minutes_left = lock.minutes_left(now_millis()),
                "Edit lock forcibly released"
            );
        }
        removed
    }

    pub fn current_lock(&self, page: &str) -> Option<PageLock> {
        let now = now_millis();
        self.guard().get(page).filter(|l| !l.is_expired(now)).cloned()
    }

    pub fn active_locks(&self) -> Vec<PageLock> {
        let now = now_millis();
        let mut locks: Vec<PageLock> = self
            .guard()
            .values()
            .filter(|l| !l.is_expired(now))
            .cloned()
            .collect();
        locks.sort_by(|a, b| a.page.cmp(&b.page));
        locks
    }

    /// Removes every lock expired at `now`; returns how many were dropped.
    pub fn reap_expired(&self, now: Timestamp) -> usize {
        let mut locks = self.guard();
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_expired(now));
        let reaped = before - locks.len();
        if reaped > 0 {
            info!(reaped = reaped, "Expired page locks removed");
        }
        reaped
    }

    /// Starts a background thread sweeping expired locks every `interval`.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> ReaperHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let manager = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("wikiforge-lock-reaper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        manager.reap_expired(now_millis());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });
        match handle {
            Ok(handle) => ReaperHandle {
                stop: Some(stop_tx),
                thread: Some(handle),
            },
            Err(e) => {
                warn!(error = %e, "Failed to start lock reaper; expired locks are reaped lazily");
                ReaperHandle {
                    stop: None,
                    thread: None,
                }
            }
        }
    }
}

/// Stops the reaper thread when dropped.
pub struct ReaperHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
