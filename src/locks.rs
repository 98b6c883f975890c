//! Keyed async mutexes serialising read-modify-write cycles.
//!
//! Acquisition order is tenant schedule lock, then member, then session.
//! Code holding a session guard never asks for a member guard.
//! An entry lives only while some task holds or awaits its lock.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{MemberId, SessionId, TenantId};

type Slots<K> = Arc<DashMap<K, Arc<Mutex<()>>>>;

#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    slots: Slots<K>,
}

/// Held lock on one key. Dropping it releases the lock and prunes the
/// entry once no other task references it.
#[must_use = "the lock is released when the guard is dropped"]
pub struct KeyGuard<K: Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots<K>,
    key: K,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone of the slot; a count of one means
        // only the map refers to it.
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        // Clone the Arc out so the shard guard is dropped before awaiting.
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = slot.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            slots: self.slots.clone(),
            key: key.clone(),
        }
    }

    /// Keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock families shared by the catalog, session manager and booking engine.
#[derive(Debug, Default)]
pub struct LockRegistry {
    pub schedules: KeyedLocks<TenantId>,
    pub members: KeyedLocks<MemberId>,
    pub sessions: KeyedLocks<SessionId>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}
