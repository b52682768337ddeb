//! Fingerprint-keyed store of grouped errors
//!
//! The store enforces two limits: a retention window on `last_seen`, applied
//! by `reap`, and a record cap. The cap is enforced on insert and on every
//! reap; eviction always removes the least-recently-seen records first.

use crate::events::Timestamp;
use crate::tracking::record::TrackedError;
use std::collections::HashMap;

/// Map of fingerprint to grouped error record
#[derive(Debug, Clone)]
pub struct ErrorStore {
    errors: HashMap<String, TrackedError>,
    max_errors: usize,
}

impl ErrorStore {
    /// Create an empty store holding at most `max_errors` records
    ///
    /// A cap of zero is treated as one.
    pub fn new(max_errors: usize) -> Self {
        Self {
            errors: HashMap::new(),
            max_errors: max_errors.max(1),
        }
    }

    pub fn max_errors(&self) -> usize {
        self.max_errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&TrackedError> {
        self.errors.get(fingerprint)
    }

    pub(crate) fn get_mut(&mut self, fingerprint: &str) -> Option<&mut TrackedError> {
        self.errors.get_mut(fingerprint)
    }

    /// Iterate over every stored record in arbitrary order
    pub fn values(&self) -> impl Iterator<Item = &TrackedError> {
        self.errors.values()
    }

    /// Insert a record for a fingerprint not yet stored
    ///
    /// When the store is full the least-recently-seen records are evicted
    /// first. Returns the evicted records.
    pub fn insert(&mut self, record: TrackedError) -> Vec<TrackedError> {
        let mut evicted = Vec::new();
        if !self.errors.contains_key(&record.fingerprint) {
            while self.errors.len() >= self.max_errors {
                match self.oldest_fingerprint() {
                    Some(oldest) => {
                        if let Some(removed) = self.errors.remove(&oldest) {
                            evicted.push(removed);
                        }
                    }
                    None => break,
                }
            }
        }
        self.errors.insert(record.fingerprint.clone(), record);
        evicted
    }

    /// Remove records last seen before `cutoff`, then enforce the cap
    ///
    /// Returns the number of records removed.
    pub fn reap(&mut self, cutoff: Timestamp) -> usize {
        let before = self.errors.len();
        self.errors.retain(|_, error| error.last_seen >= cutoff);
        let expired = before - self.errors.len();
        expired + self.enforce_capacity()
    }

    /// Evict least-recently-seen records until at most `max_errors` remain
    pub fn enforce_capacity(&mut self) -> usize {
        if self.errors.len() <= self.max_errors {
            return 0;
        }

        let mut by_age: Vec<(Timestamp, String)> = self
            .errors
            .values()
            .map(|error| (error.last_seen, error.fingerprint.clone()))
            .collect();
        by_age.sort();

        let excess = self.errors.len() - self.max_errors;
        for (_, fingerprint) in by_age.into_iter().take(excess) {
            self.errors.remove(&fingerprint);
        }
        excess
    }

    /// Change the record cap, evicting immediately if needed
    pub fn set_max_errors(&mut self, max_errors: usize) -> usize {
        self.max_errors = max_errors.max(1);
        self.enforce_capacity()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    fn oldest_fingerprint(&self) -> Option<String> {
        self.errors
            .values()
            .min_by(|a, b| {
                a.last_seen
                    .cmp(&b.last_seen)
                    .then_with(|| a.fingerprint.cmp(&b.fingerprint))
            })
            .map(|error| error.fingerprint.clone())
    }
}
