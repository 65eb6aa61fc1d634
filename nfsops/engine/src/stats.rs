//! Engine health counters
//!
//! Tracks how many events the engine saw and how many it had to drop.
//! Indices are the `STAT_*` constants.

use nfsops_common::constants::{MAX_STATS, STAT_NAMES};
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed set of monotonic counters
#[derive(Debug, Default)]
pub struct EngineStats {
    counters: [AtomicU64; MAX_STATS as usize],
}

impl EngineStats {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a statistics counter
    ///
    /// Unknown ids are ignored.
    #[inline(always)]
    pub fn increment(&self, stat_id: u32) {
        if let Some(counter) = self.counters.get(stat_id as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current value of one counter
    pub fn get(&self, stat_id: u32) -> u64 {
        self.counters
            .get(stat_id as usize)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Name and value of every counter
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        STAT_NAMES
            .iter()
            .zip(self.counters.iter())
            .map(|(name, c)| (*name, c.load(Ordering::Relaxed)))
            .collect()
    }
}
