use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Round-robin counters for rebind answers, one per policy pattern.
///
/// Counters are created on first use and live as long as the store.
#[derive(Debug, Default)]
pub struct RebindStore {
    counters: DashMap<String, AtomicU64>,
}

impl RebindStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the next index into a list of `len` answers for `key`.
    ///
    /// The first call for a key returns 0, later calls cycle through `0..len`.
    pub fn next_index(&self, key: &str, len: usize) -> usize {
        if len == 0 {
            return 0;
        }

        // Fast path: the counter exists and only a shard read lock is needed
        let previous = match self.counters.get(key) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed),
            None => self
                .counters
                .entry(key.to_owned())
                .or_default()
                .fetch_add(1, Ordering::Relaxed),
        };

        (previous % len as u64) as usize
    }

    /// Number of keys that have a counter
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
