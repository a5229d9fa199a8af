use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

/// Set of keys with an operation in flight. Acquisition never waits: a key
/// that is already held is refused.
#[derive(Debug)]
pub(crate) struct InFlight<K> {
    keys: Mutex<HashSet<K>>,
}

impl<K: Eq + Hash + Copy> InFlight<K> {
    pub(crate) fn new() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn try_acquire(&self, key: K) -> Option<InFlightGuard<'_, K>> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.insert(key).then_some(InFlightGuard { owner: self, key })
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self, key: K) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }
}

/// Releases its key when dropped.
#[derive(Debug)]
pub(crate) struct InFlightGuard<'a, K: Eq + Hash + Copy> {
    owner: &'a InFlight<K>,
    key: K,
}

impl<K: Eq + Hash + Copy> Drop for InFlightGuard<'_, K> {
    fn drop(&mut self) {
        self.owner
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
