//! Per-key async mutex map for single-flight coordination.
//!
//! The first caller for a key performs the expensive operation while holding
//! the key's mutex; concurrent callers suspend on the same mutex and, once
//! admitted, re-check shared state before repeating the work. Each entry
//! carries an interest count; the entry is dropped when the last caller
//! releases it, so the map stays proportional to in-flight keys.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;

struct Entry {
    lock: Arc<AsyncMutex<()>>,
    interested: usize,
}

/// A map of lazily created per-key async mutexes.
///
/// Every [`Self::acquire`] must be paired with exactly one [`Self::release`]
/// once the caller is done with the returned mutex.
pub struct KeyedMutex<K: Eq + Hash + Clone> {
    entries: StdMutex<HashMap<K, Entry>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the mutex for a key, registering interest in it.
    pub fn acquire(&self, key: K) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().expect("keyed mutex map poisoned");
        let entry = entries.entry(key).or_insert_with(|| Entry {
            lock: Arc::new(AsyncMutex::new(())),
            interested: 0,
        });
        entry.interested += 1;
        entry.lock.clone()
    }

    /// Withdraw interest in a key, dropping the entry with the last caller.
    pub fn release(&self, key: &K) {
        let mut entries = self.entries.lock().expect("keyed mutex map poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.interested = entry.interested.saturating_sub(1);
            if entry.interested == 0 {
                entries.remove(key);
            }
        }
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("keyed mutex map poisoned").len()
    }

    /// Whether no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_concurrent_callers_coalesce_to_one_refresh() {
        let flights = Arc::new(KeyedMutex::new());
        let refresh_count = Arc::new(AtomicU32::new(0));
        let fresh = Arc::new(AtomicBool::new(false));
        let key = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let flights = flights.clone();
            let refresh_count = refresh_count.clone();
            let fresh = fresh.clone();

            handles.push(tokio::spawn(async move {
                let lock = flights.acquire(key);
                {
                    let _guard = lock.lock().await;
                    // Followers re-check state after being admitted, exactly
                    // like the token manager re-reads the connection row.
                    if !fresh.load(Ordering::SeqCst) {
                        refresh_count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        fresh.store(true, Ordering::SeqCst);
                    }
                }
                flights.release(&key);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(refresh_count.load(Ordering::SeqCst), 1);
        assert!(flights.is_empty(), "entry should be dropped after release");
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let flights: KeyedMutex<Uuid> = KeyedMutex::new();

        let lock_a = flights.acquire(Uuid::new_v4());
        let lock_b = flights.acquire(Uuid::new_v4());

        let _guard_a = lock_a.lock().await;
        // A second key locks immediately even while the first is held.
        assert!(lock_b.try_lock().is_ok());
        assert_eq!(flights.len(), 2);
    }

    #[tokio::test]
    async fn test_release_keeps_entry_while_contended() {
        let flights: KeyedMutex<Uuid> = KeyedMutex::new();
        let key = Uuid::new_v4();

        let first = flights.acquire(key);
        let second = flights.acquire(key);

        flights.release(&key);
        assert_eq!(flights.len(), 1, "second caller is still interested");

        flights.release(&key);
        assert!(flights.is_empty());

        drop(first);
        drop(second);
    }

    #[test]
    fn test_release_of_unknown_key_is_noop() {
        let flights: KeyedMutex<Uuid> = KeyedMutex::new();
        flights.release(&Uuid::new_v4());
        assert!(flights.is_empty());
    }
}
