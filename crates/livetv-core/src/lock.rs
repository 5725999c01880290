//! Per-source refresh locks.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key, created on demand and dropped with its last
/// holder.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.clone().lock_owned().await;
        KeyedGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            lock,
            _guard: guard,
        }
    }

    /// Keys with a holder or a waiter.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[derive(Debug)]
pub struct KeyedGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    lock: Arc<Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Map entry, `lock` and the mutex guard: three references means no waiters.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) <= 3);
    }
}

/// Keys held by one logical refresh.
///
/// Re-entering a key the scope already holds is a no-op, so a refresh can
/// recurse into derived channels without deadlocking on itself while
/// separate scopes still serialize.
#[derive(Debug)]
pub struct RefreshScope {
    locks: KeyedLocks,
    held: HashMap<String, KeyedGuard>,
}

impl RefreshScope {
    pub fn new(locks: &KeyedLocks) -> Self {
        Self {
            locks: locks.clone(),
            held: HashMap::new(),
        }
    }

    /// Locks `key` for this scope. Returns `false` when the scope already
    /// held it.
    pub async fn acquire(&mut self, key: &str) -> bool {
        if self.held.contains_key(key) {
            return false;
        }
        let guard = self.locks.lock(key).await;
        self.held.insert(key.to_string(), guard);
        true
    }

    pub fn release(&mut self, key: &str) {
        self.held.remove(key);
    }

    pub fn holds(&self, key: &str) -> bool {
        self.held.contains_key(key)
    }
}
