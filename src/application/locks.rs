use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key, created on first use and dropped again once no
/// guard holds it and no caller is waiting on it.
///
/// Work on different keys proceeds in parallel; work on the same key is
/// linearized in arrival order (tokio mutexes are fair).
pub struct KeyedLocks<K: Eq + Hash> {
    slots: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

/// Proof that the caller holds the lock for `key`.
pub struct KeyGuard<K: Eq + Hash> {
    key: K,
    slots: Arc<DashMap<K, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Copy> KeyGuard<K> {
    pub fn key(&self) -> K {
        self.key
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own handle left: nobody holds or awaits this slot.
        // Checked under the shard lock, which `lock` also takes to clone it.
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Copy,
{
    fn default() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Copy,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        // Clone the Arc out so the shard lock is not held across the await.
        let slot = self
            .slots
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            key,
            slots: self.slots.clone(),
            guard: Some(slot.lock_owned().await),
        }
    }

    /// Number of keys with a live slot.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
