//! Dedup tracker: the set of item identities already notified.
//!
//! The set is insert-only for the life of the process. An item that closes
//! and disappears is never evicted, so a reused identity would not notify
//! again. State is in-memory only; a restart starts from an empty set and
//! every currently open item is new exactly once.

use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug)]
pub struct DedupTracker<K> {
    seen: HashSet<K>,
}

impl<K: Hash + Eq> DedupTracker<K> {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }

    /// Record `key`. Returns `true` if it had not been seen before.
    pub fn check_and_insert(&mut self, key: K) -> bool {
        self.seen.insert(key)
    }

    /// Keep only the items not seen before, marking them seen.
    ///
    /// Items are processed in order, so a duplicate within one batch is
    /// returned once.
    pub fn classify<T, F>(&mut self, items: Vec<T>, key: F) -> Vec<T>
    where
        F: Fn(&T) -> K,
    {
        items
            .into_iter()
            .filter(|item| self.check_and_insert(key(item)))
            .collect()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains(key)
    }

    /// Number of tracked identities (for monitoring).
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl<K: Hash + Eq> Default for DedupTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}
