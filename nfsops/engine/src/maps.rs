//! Concurrent table definitions for operation tracking
//!
//! Defines the two tables shared by every handler: the in-flight table
//! bridging an operation's entry and exit, and the summary table holding
//! per-identity counters. Both are [`BoundedMap`]s, a `DashMap` with a
//! fixed entry limit.

use crate::record::SummaryRecord;
use dashmap::{mapref::entry::Entry, DashMap};
use nfsops_common::{ExecKey, InFlightKey, InFlightRecord, OpCounts, OpKind, StatsKey};
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Concurrent hash map holding at most `capacity` entries
///
/// The entry count is tracked next to the map and insertion of a new key
/// fails once it reaches the capacity, like a BPF hash map's `max_entries`.
pub struct BoundedMap<K, V> {
    map: DashMap<K, V>,
    len: AtomicUsize,
    capacity: usize,
}

impl<K, V> BoundedMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a map holding at most `capacity` entries (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            map: DashMap::new(),
            len: AtomicUsize::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Claim one unit of capacity
    fn try_reserve(&self) -> bool {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// Return the value stored for `key`, inserting `init()` if absent
    ///
    /// When two callers race on the same absent key, the first insertion
    /// wins and the loser gets a copy of the winner's value; its own `init`
    /// is never run. Returns `None` only when the key is absent and the
    /// map is full.
    pub fn get_or_try_insert_with<F>(&self, key: K, init: F) -> Option<V>
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.map.get(&key) {
            return Some(value.value().clone());
        }

        match self.map.entry(key) {
            Entry::Occupied(slot) => Some(slot.get().clone()),
            Entry::Vacant(slot) => {
                if !self.try_reserve() {
                    return None;
                }
                Some(slot.insert(init()).value().clone())
            }
        }
    }

    /// Store `value` under `key`, replacing any previous value
    ///
    /// Returns the replaced value, or `Err(value)` when the key is new and
    /// the map is full.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>, V> {
        match self.map.entry(key) {
            Entry::Occupied(mut slot) => Ok(Some(slot.insert(value))),
            Entry::Vacant(slot) => {
                if !self.try_reserve() {
                    return Err(value);
                }
                slot.insert(value);
                Ok(None)
            }
        }
    }

    /// Remove and return the value stored for `key`
    pub fn remove(&self, key: &K) -> Option<V> {
        let (_, value) = self.map.remove(key)?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }

    /// Copy of the value stored for `key`
    pub fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).map(|value| value.value().clone())
    }

    /// Remove every entry present when the drain starts
    ///
    /// Inserts racing with the drain land either in the returned batch or
    /// in the map afterwards, never in both.
    pub fn drain(&self) -> Vec<(K, V)> {
        let keys: Vec<K> = self.map.iter().map(|entry| entry.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| {
                let value = self.remove(&key)?;
                Some((key, value))
            })
            .collect()
    }

    /// Copy every entry without removing it
    pub fn collect(&self) -> Vec<(K, V)> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the map holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Outcome of recording an operation's entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOp {
    /// The slot was free
    Started,
    /// An earlier entry whose exit never came was overwritten
    Replaced(InFlightRecord),
    /// The table is full and the operation goes untracked
    Full,
}

/// In-flight operation table
///
/// Key: InFlightKey (thread id + operation kind)
/// Value: InFlightRecord written at entry
///
/// A record lives from an operation's entry until its exit on the same
/// thread. A thread runs one call of a kind at a time, so a second entry
/// on an occupied slot means the first call's exit was lost.
pub struct InFlightTable {
    table: BoundedMap<InFlightKey, InFlightRecord>,
}

impl InFlightTable {
    /// Create a table holding at most `capacity` pending operations
    pub fn new(capacity: usize) -> Self {
        Self {
            table: BoundedMap::new(capacity),
        }
    }

    /// Record an operation's entry
    ///
    /// The newest entry always owns the slot.
    pub fn begin_op(&self, ctx: ExecKey, op: OpKind, record: InFlightRecord) -> BeginOp {
        match self.table.insert(InFlightKey { ctx, op }, record) {
            Ok(None) => BeginOp::Started,
            Ok(Some(orphan)) => BeginOp::Replaced(orphan),
            Err(_) => BeginOp::Full,
        }
    }

    /// Consume the record of an operation's entry
    ///
    /// Returns `None` for an exit without a tracked entry.
    pub fn end_op(&self, ctx: ExecKey, op: OpKind) -> Option<InFlightRecord> {
        self.table.remove(&InFlightKey { ctx, op })
    }

    /// Number of pending operations
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no operation is pending
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Maximum number of pending operations
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}

/// Per-identity summary table
///
/// Key: StatsKey (pid, tid, uid, comm, volume)
/// Value: shared SummaryRecord of atomic counters
///
/// Records are created on first sight of an identity and only removed by
/// the reader through [`SummaryTable::drain`].
pub struct SummaryTable {
    table: BoundedMap<StatsKey, Arc<SummaryRecord>>,
}

impl SummaryTable {
    /// Create a table holding at most `capacity` identities
    pub fn new(capacity: usize) -> Self {
        Self {
            table: BoundedMap::new(capacity),
        }
    }

    /// Record of `key`, zero-initialised on first sight
    ///
    /// Returns `None` when the identity is new and the table is full.
    pub fn get_or_create(&self, key: &StatsKey) -> Option<Arc<SummaryRecord>> {
        self.table
            .get_or_try_insert_with(*key, || Arc::new(SummaryRecord::new()))
    }

    /// Record of `key`, if present
    pub fn get(&self, key: &StatsKey) -> Option<Arc<SummaryRecord>> {
        self.table.get(key)
    }

    /// Counter values of every identity, leaving the table untouched
    pub fn snapshot(&self) -> Vec<(StatsKey, OpCounts)> {
        self.table
            .collect()
            .into_iter()
            .map(|(key, record)| (key, record.load()))
            .collect()
    }

    /// Remove every identity and return its final counter values
    ///
    /// A fold holding a record across the drain may land after the load
    /// and is lost with the record.
    pub fn drain(&self) -> Vec<(StatsKey, OpCounts)> {
        self.table
            .drain()
            .into_iter()
            .map(|(key, record)| (key, record.load()))
            .collect()
    }

    /// Number of identities
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no identity has been recorded
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Maximum number of identities
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}
