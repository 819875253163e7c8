//! Named reentrant locks.
//!
//! A `LockManager` hands out one lock per name for its whole lifetime, so
//! callers contending on the same logical resource ("rule:X", "type:Y")
//! really serialize against each other. Managers are owned by a transaction
//! and dropped with it; nothing here is process-global.

use dashmap::DashMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::sync::Arc;

pub fn rule_lock_name(label: &str) -> String {
    format!("rule:{label}")
}

pub fn type_lock_name(label: &str) -> String {
    format!("type:{label}")
}

#[derive(Clone)]
pub struct NamedLock {
    name: Arc<str>,
    mutex: Arc<ReentrantMutex<()>>,
}

impl NamedLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until held. Re-acquiring on the holding thread does not block.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.mutex.lock()
    }

    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        self.mutex.try_lock()
    }

    /// Whether both handles refer to the same underlying lock.
    pub fn same_as(&self, other: &NamedLock) -> bool {
        Arc::ptr_eq(&self.mutex, &other.mutex)
    }
}

impl std::fmt::Debug for NamedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedLock").field("name", &self.name).finish()
    }
}

#[derive(Default)]
pub struct LockManager {
    locks: DashMap<String, NamedLock>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_lock(&self, name: &str) -> NamedLock {
        if let Some(existing) = self.locks.get(name) {
            return existing.clone();
        }
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| NamedLock {
                name: Arc::from(name),
                mutex: Arc::new(ReentrantMutex::new(())),
            })
            .clone()
    }

    /// Run `f` holding every named lock. Locks are taken in name order so
    /// two callers with overlapping sets cannot deadlock.
    pub fn with_locks<R>(&self, names: impl IntoIterator<Item = String>, f: impl FnOnce() -> R) -> R {
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names.dedup();
        let locks: Vec<NamedLock> = names.iter().map(|n| self.get_lock(n)).collect();
        let _guards: Vec<ReentrantMutexGuard<'_, ()>> = locks.iter().map(NamedLock::lock).collect();
        f()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn same_name_same_lock() {
        let manager = LockManager::new();
        let a = manager.get_lock("x");
        let b = manager.get_lock("x");
        let c = manager.get_lock("y");
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn locks_exclude_other_threads_and_reenter() {
        let manager = LockManager::new();
        let held = manager.get_lock("x");
        let _outer = held.lock();
        let _inner = held.lock();
        thread::scope(|s| {
            s.spawn(|| {
                assert!(manager.get_lock("x").try_lock().is_none());
                assert!(manager.get_lock("y").try_lock().is_some());
            });
        });
    }

    #[test]
    fn with_locks_holds_every_name() {
        let manager = LockManager::new();
        let names = vec![type_lock_name("parent"), rule_lock_name("r"), rule_lock_name("r")];
        manager.with_locks(names, || {
            thread::scope(|s| {
                s.spawn(|| {
                    assert!(manager.get_lock("rule:r").try_lock().is_none());
                    assert!(manager.get_lock("type:parent").try_lock().is_none());
                });
            });
        });
        assert!(manager.get_lock("rule:r").try_lock().is_some());
    }
}
