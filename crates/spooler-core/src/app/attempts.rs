//! Per-record failure counters.
//!
//! Memory only: a restart gives every record a fresh retry budget.

use std::collections::HashMap;

use crate::domain::RecordId;

/// Consecutive delivery failures, keyed by record id.
///
/// Owned by one worker instance; never shared, never persisted.
#[derive(Debug, Default)]
pub struct AttemptTracker {
    counts: HashMap<RecordId, u32>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure and return the new total.
    pub fn record_failure(&mut self, record_id: &RecordId) -> u32 {
        let count = self.counts.entry(record_id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Forget a record (after success or dead-lettering).
    pub fn clear(&mut self, record_id: &RecordId) {
        self.counts.remove(record_id);
    }

    /// Forget every record older than `head`.
    ///
    /// `head` is the oldest pending record, so anything before it has left
    /// the queue (evicted, cleared or removed elsewhere).
    pub fn prune_before(&mut self, head: &RecordId) {
        self.counts.retain(|record_id, _| record_id >= head);
    }

    /// Forget everything (the queue is empty).
    pub fn clear_all(&mut self) {
        self.counts.clear();
    }

    pub fn get(&self, record_id: &RecordId) -> u32 {
        self.counts.get(record_id).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
