//! Entry/exit correlation engine
//!
//! Owns the in-flight table, the summary table, the launch queue and the
//! health counters. Handlers call [`Tracker::record_entry`] and
//! [`Tracker::record_exit`]; neither ever fails or blocks on I/O.

use crate::{
    filter::should_filter,
    helpers::{elapsed_ns, exec_key, stats_key, ProbeContext},
    launch::LaunchQueue,
    maps::{BeginOp, InFlightTable, SummaryTable},
    stats::EngineStats,
};
use log::{debug, trace};
use nfsops_common::{constants::*, InFlightRecord, OpKind, TargetHandle, TargetMeta};

/// How handlers account for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerMode {
    /// Entry starts a record, exit folds count, outcome and duration
    #[default]
    Correlated,
    /// Entry counts the operation, exit does nothing
    ImmediateCount,
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Accounting mode
    pub mode: TrackerMode,
    /// Maximum number of pending operations
    pub in_flight_capacity: usize,
    /// Maximum number of identities
    pub summary_capacity: usize,
    /// Maximum number of pending launch notifications
    pub launch_capacity: usize,
    /// Key identities by the target's volume
    pub track_volume: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            mode: TrackerMode::Correlated,
            in_flight_capacity: MAX_IN_FLIGHT as usize,
            summary_capacity: MAX_IDENTITIES as usize,
            launch_capacity: MAX_LAUNCH_EVENTS as usize,
            track_volume: true,
        }
    }
}

impl TrackerConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accounting mode
    pub fn with_mode(mut self, mode: TrackerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the in-flight table capacity
    pub fn with_in_flight_capacity(mut self, capacity: usize) -> Self {
        self.in_flight_capacity = capacity.max(1);
        self
    }

    /// Set the summary table capacity
    pub fn with_summary_capacity(mut self, capacity: usize) -> Self {
        self.summary_capacity = capacity.max(1);
        self
    }

    /// Set the launch queue capacity
    pub fn with_launch_capacity(mut self, capacity: usize) -> Self {
        self.launch_capacity = capacity.max(1);
        self
    }

    /// Enable or disable per-volume identities
    pub fn with_track_volume(mut self, track_volume: bool) -> Self {
        self.track_volume = track_volume;
        self
    }
}

/// Subject of a traced operation
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// Open file with its metadata, subject to the filter
    File(&'a TargetMeta),
    /// Bare inode handle, never filtered
    Node(TargetHandle),
}

impl Target<'_> {
    /// Handle of the subject
    pub fn handle(&self) -> TargetHandle {
        match self {
            Target::File(meta) => meta.handle,
            Target::Node(handle) => *handle,
        }
    }
}

/// Reason an event left no trace in the summary table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Target rejected by the filter
    Filtered,
    /// Exit without a tracked entry
    CorrelationMiss,
    /// In-flight table full at entry
    InFlightFull,
    /// Summary table full for a new identity
    SummaryFull,
}

impl Skip {
    /// Health counter tracking this reason
    pub const fn stat_id(self) -> u32 {
        match self {
            Skip::Filtered => STAT_FILTERED,
            Skip::CorrelationMiss => STAT_CORRELATION_MISSES,
            Skip::InFlightFull => STAT_IN_FLIGHT_FULL,
            Skip::SummaryFull => STAT_SUMMARY_FULL,
        }
    }
}

/// Operation statistics engine
pub struct Tracker {
    config: TrackerConfig,
    in_flight: InFlightTable,
    summary: SummaryTable,
    launches: LaunchQueue,
    stats: EngineStats,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Tracker {
    /// Create an engine with empty tables
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            in_flight: InFlightTable::new(config.in_flight_capacity),
            summary: SummaryTable::new(config.summary_capacity),
            launches: LaunchQueue::new(config.launch_capacity),
            stats: EngineStats::new(),
            config,
        }
    }

    /// Pending operations
    pub fn in_flight(&self) -> &InFlightTable {
        &self.in_flight
    }

    /// Per-identity counters
    pub fn summary(&self) -> &SummaryTable {
        &self.summary
    }

    /// Pending process-launch notifications
    pub fn launches(&self) -> &LaunchQueue {
        &self.launches
    }

    /// Health counters
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Handle an operation's entry
    ///
    /// `bytes` is the size known at entry, e.g. a read's requested count.
    pub fn record_entry<C: ProbeContext + ?Sized>(
        &self,
        ctx: &C,
        op: OpKind,
        target: Target<'_>,
        bytes: Option<u64>,
    ) {
        self.stats.increment(STAT_ENTRY_EVENTS);
        if let Err(skip) = self.try_record_entry(ctx, op, target, bytes) {
            self.skipped(op, skip);
        }
    }

    fn try_record_entry<C: ProbeContext + ?Sized>(
        &self,
        ctx: &C,
        op: OpKind,
        target: Target<'_>,
        bytes: Option<u64>,
    ) -> Result<(), Skip> {
        if let Target::File(meta) = target {
            if should_filter(meta) {
                return Err(Skip::Filtered);
            }
        }

        let handle = target.handle();

        match self.config.mode {
            TrackerMode::ImmediateCount => {
                let key = stats_key(ctx, self.volume_of(&handle));
                let record = self.summary.get_or_create(&key).ok_or(Skip::SummaryFull)?;
                record.count(op, bytes);
            }
            TrackerMode::Correlated => {
                let record = InFlightRecord {
                    target: handle,
                    start_ns: ctx.ktime_ns(),
                    byte_hint: bytes,
                };
                match self.in_flight.begin_op(exec_key(ctx), op, record) {
                    BeginOp::Started => {}
                    BeginOp::Replaced(orphan) => {
                        self.stats.increment(STAT_IN_FLIGHT_REPLACED);
                        debug!(
                            "Replaced orphaned {} entry started at {}ns",
                            op.name(),
                            orphan.start_ns
                        );
                    }
                    BeginOp::Full => return Err(Skip::InFlightFull),
                }
            }
        }

        Ok(())
    }

    /// Handle an operation's exit with the traced call's return code
    pub fn record_exit<C: ProbeContext + ?Sized>(&self, ctx: &C, op: OpKind, rc: i64) {
        self.stats.increment(STAT_EXIT_EVENTS);
        if let Err(skip) = self.try_record_exit(ctx, op, rc) {
            self.skipped(op, skip);
        }
    }

    fn try_record_exit<C: ProbeContext + ?Sized>(
        &self,
        ctx: &C,
        op: OpKind,
        rc: i64,
    ) -> Result<(), Skip> {
        if self.config.mode == TrackerMode::ImmediateCount {
            return Ok(());
        }

        let now = ctx.ktime_ns();
        let entry = self
            .in_flight
            .end_op(exec_key(ctx), op)
            .ok_or(Skip::CorrelationMiss)?;

        // volume belongs to the target recorded at entry
        let key = stats_key(ctx, self.volume_of(&entry.target));
        let record = self.summary.get_or_create(&key).ok_or(Skip::SummaryFull)?;

        record.fold(
            op,
            elapsed_ns(entry.start_ns, now),
            op.is_error(rc),
            entry.byte_hint,
        );

        Ok(())
    }

    /// Queue a process-launch notification
    pub fn notify_launch<C: ProbeContext + ?Sized>(&self, ctx: &C) {
        let pid = crate::helpers::get_pid(ctx);
        if self.launches.notify(pid) {
            self.stats.increment(STAT_LAUNCH_EVENTS);
        } else {
            self.stats.increment(STAT_LAUNCH_DROPPED);
            debug!("Launch queue full, dropped notification for pid {}", pid);
        }
    }

    #[inline]
    fn volume_of(&self, handle: &TargetHandle) -> Option<u32> {
        self.config.track_volume.then_some(handle.dev)
    }

    fn skipped(&self, op: OpKind, skip: Skip) {
        self.stats.increment(skip.stat_id());
        match skip {
            Skip::InFlightFull | Skip::SummaryFull => {
                debug!("Dropped {} event: {:?}", op.name(), skip);
            }
            Skip::Filtered | Skip::CorrelationMiss => {
                trace!("Skipped {} event: {:?}", op.name(), skip);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::testing::FakeTask;
    use nfsops_common::{Comm, StatsKey};

    fn file(ino: u64, dev: u32) -> TargetMeta {
        TargetMeta {
            handle: TargetHandle::new(ino, dev),
            mode: S_IFREG | 0o644,
            name_len: 5,
        }
    }

    fn key_of(task: &FakeTask, volume: Option<u32>) -> StatsKey {
        stats_key(task, volume)
    }

    #[test]
    fn test_config_builder() {
        let config = TrackerConfig::new()
            .with_mode(TrackerMode::ImmediateCount)
            .with_in_flight_capacity(0)
            .with_summary_capacity(16)
            .with_launch_capacity(0)
            .with_track_volume(false);

        assert_eq!(config.mode, TrackerMode::ImmediateCount);
        assert_eq!(config.in_flight_capacity, 1);
        assert_eq!(config.summary_capacity, 16);
        assert_eq!(config.launch_capacity, 1);
        assert!(!config.track_volume);
    }

    #[test]
    fn test_duration_is_exit_minus_entry() {
        let tracker = Tracker::default();
        let task = FakeTask::new(1, 1);
        let f = file(10, 7);

        tracker.record_entry(&task, OpKind::Fsync, Target::File(&f), None);
        task.advance(1_500);
        tracker.record_exit(&task, OpKind::Fsync, 0);

        let counts = tracker.summary().get(&key_of(&task, Some(7))).unwrap().load();
        assert_eq!(counts.get(OpKind::Fsync).duration_ns, 1_500);
        assert!(tracker.in_flight().is_empty());
    }

    #[test]
    fn test_exit_without_entry_changes_nothing() {
        let tracker = Tracker::default();
        let task = FakeTask::new(1, 1);

        tracker.record_exit(&task, OpKind::Read, 4096);

        assert!(tracker.summary().is_empty());
        assert_eq!(tracker.stats().get(STAT_CORRELATION_MISSES), 1);
    }

    #[test]
    fn test_filtered_entry_leaves_no_record() {
        let tracker = Tracker::default();
        let task = FakeTask::new(1, 1);
        let unnamed = TargetMeta {
            name_len: 0,
            ..file(10, 7)
        };

        tracker.record_entry(&task, OpKind::Read, Target::File(&unnamed), Some(10));
        tracker.record_exit(&task, OpKind::Read, 10);

        assert!(tracker.in_flight().is_empty());
        assert!(tracker.summary().is_empty());
        assert_eq!(tracker.stats().get(STAT_FILTERED), 1);
        assert_eq!(tracker.stats().get(STAT_CORRELATION_MISSES), 1);
    }

    #[test]
    fn test_node_targets_skip_the_filter() {
        let tracker = Tracker::default();
        let task = FakeTask::new(1, 1);

        tracker.record_entry(&task, OpKind::Unlink, Target::Node(TargetHandle::new(3, 7)), None);
        tracker.record_exit(&task, OpKind::Unlink, 0);

        let counts = tracker.summary().get(&key_of(&task, Some(7))).unwrap().load();
        assert_eq!(counts.get(OpKind::Unlink).count, 1);
        assert_eq!(tracker.stats().get(STAT_FILTERED), 0);
    }

    #[test]
    fn test_orphaned_entry_is_replaced_by_the_next_call() {
        let tracker = Tracker::default();
        let task = FakeTask::new(1, 1);
        let stale = file(10, 7);
        let fresh = file(11, 9);

        // exit of this read is never seen
        tracker.record_entry(&task, OpKind::Read, Target::File(&stale), Some(1_000_000));
        task.advance(60_000_000_000);

        tracker.record_entry(&task, OpKind::Read, Target::File(&fresh), Some(10));
        task.advance(100);
        tracker.record_exit(&task, OpKind::Read, 10);

        assert!(tracker.summary().get(&key_of(&task, Some(7))).is_none());
        let counts = tracker.summary().get(&key_of(&task, Some(9))).unwrap().load();
        assert_eq!(counts.get(OpKind::Read).count, 1);
        assert_eq!(counts.get(OpKind::Read).duration_ns, 100);
        assert_eq!(counts.rbytes, 10);

        assert_eq!(tracker.stats().get(STAT_IN_FLIGHT_REPLACED), 1);
        assert!(tracker.in_flight().is_empty());
    }

    #[test]
    fn test_in_flight_full_drops_entry() {
        let tracker = Tracker::new(TrackerConfig::new().with_in_flight_capacity(1));
        let a = FakeTask::new(1, 1);
        let b = FakeTask::new(2, 2);
        let f = file(10, 7);

        tracker.record_entry(&a, OpKind::Mmap, Target::File(&f), None);
        tracker.record_entry(&b, OpKind::Mmap, Target::File(&f), None);
        tracker.record_exit(&b, OpKind::Mmap, 0);
        tracker.record_exit(&a, OpKind::Mmap, 0);

        assert_eq!(tracker.stats().get(STAT_IN_FLIGHT_FULL), 1);
        assert_eq!(tracker.stats().get(STAT_CORRELATION_MISSES), 1);
        assert_eq!(tracker.summary().len(), 1);
        assert!(tracker.summary().get(&key_of(&b, Some(7))).is_none());
    }

    #[test]
    fn test_summary_full_omits_new_identity() {
        let tracker = Tracker::new(TrackerConfig::new().with_summary_capacity(1));
        let a = FakeTask::new(1, 1);
        let b = FakeTask::new(2, 2);
        let f = file(10, 7);

        for task in [&a, &b] {
            tracker.record_entry(task, OpKind::Read, Target::File(&f), Some(100));
            task.advance(10);
            tracker.record_exit(task, OpKind::Read, 100);
        }

        assert_eq!(tracker.stats().get(STAT_SUMMARY_FULL), 1);
        let counts = tracker.summary().get(&key_of(&a, Some(7))).unwrap().load();
        assert_eq!(counts.get(OpKind::Read).count, 1);
        assert_eq!(counts.rbytes, 100);
        assert!(tracker.in_flight().is_empty());
    }

    #[test]
    fn test_immediate_mode_counts_at_entry() {
        let tracker = Tracker::new(TrackerConfig::new().with_mode(TrackerMode::ImmediateCount));
        let task = FakeTask::new(1, 1);
        let f = file(10, 7);

        tracker.record_entry(&task, OpKind::Write, Target::File(&f), Some(512));
        task.advance(50);
        tracker.record_exit(&task, OpKind::Write, -5);

        let counts = tracker.summary().get(&key_of(&task, Some(7))).unwrap().load();
        let write = counts.get(OpKind::Write);
        assert_eq!(write.count, 1);
        assert_eq!(write.errors, 0);
        assert_eq!(write.duration_ns, 0);
        assert_eq!(counts.wbytes, 512);
        assert!(tracker.in_flight().is_empty());
    }

    #[test]
    fn test_volume_tracking_disabled() {
        let tracker = Tracker::new(TrackerConfig::new().with_track_volume(false));
        let task = FakeTask::new(1, 1);

        tracker.record_entry(&task, OpKind::Access, Target::Node(TargetHandle::new(1, 7)), None);
        tracker.record_exit(&task, OpKind::Access, 0);
        tracker.record_entry(&task, OpKind::Access, Target::Node(TargetHandle::new(2, 8)), None);
        tracker.record_exit(&task, OpKind::Access, -13);

        assert_eq!(tracker.summary().len(), 1);
        let counts = tracker.summary().get(&key_of(&task, None)).unwrap().load();
        assert_eq!(counts.get(OpKind::Access).count, 2);
        assert_eq!(counts.get(OpKind::Access).errors, 1);
    }

    #[test]
    fn test_launch_notifications() {
        let tracker = Tracker::new(TrackerConfig::new().with_launch_capacity(1));
        let task = FakeTask::new(77, 78);

        tracker.notify_launch(&task);
        tracker.notify_launch(&task);

        assert_eq!(tracker.stats().get(STAT_LAUNCH_EVENTS), 1);
        assert_eq!(tracker.stats().get(STAT_LAUNCH_DROPPED), 1);
        assert_eq!(tracker.launches().pop().map(|e| e.pid), Some(77));
    }

    #[test]
    fn test_concurrent_folds_are_exact_sums() {
        let tracker = Tracker::default();
        let f = file(10, 7);
        let threads = 8u32;
        let per_thread = 500u64;

        std::thread::scope(|s| {
            for tid in 0..threads {
                let tracker = &tracker;
                let f = &f;
                s.spawn(move || {
                    // same process, distinct threads
                    let task = FakeTask {
                        comm: Comm::new(b"dd"),
                        ..FakeTask::new(500, 500 + tid)
                    };
                    for i in 0..per_thread {
                        tracker.record_entry(&task, OpKind::Write, Target::File(f), Some(8));
                        task.advance(3);
                        let rc = if i % 5 == 0 { -28 } else { 8 };
                        tracker.record_exit(&task, OpKind::Write, rc);
                    }
                });
            }
        });

        let mut total = nfsops_common::OpCounts::default();
        for (key, counts) in tracker.summary().snapshot() {
            assert_eq!(key.pid, 500);
            total.merge(&counts);
        }

        let write = total.get(OpKind::Write);
        assert_eq!(write.count, threads as u64 * per_thread);
        assert_eq!(write.errors, threads as u64 * per_thread / 5);
        assert_eq!(write.duration_ns, threads as u64 * per_thread * 3);
        assert_eq!(total.wbytes, threads as u64 * per_thread * 8);
        assert!(tracker.in_flight().is_empty());
        assert_eq!(tracker.summary().len(), threads as usize);
    }

    #[test]
    fn test_concurrent_counts_on_one_identity() {
        let tracker = Tracker::new(TrackerConfig::new().with_mode(TrackerMode::ImmediateCount));
        let task = FakeTask::new(42, 42);
        let f = file(10, 7);
        let threads = 8u64;
        let per_thread = 1_000u64;

        std::thread::scope(|s| {
            for _ in 0..threads {
                let (tracker, task, f) = (&tracker, &task, &f);
                s.spawn(move || {
                    for _ in 0..per_thread {
                        tracker.record_entry(task, OpKind::Read, Target::File(f), Some(4));
                    }
                });
            }
        });

        assert_eq!(tracker.summary().len(), 1);
        let counts = tracker.summary().get(&key_of(&task, Some(7))).unwrap().load();
        assert_eq!(counts.get(OpKind::Read).count, threads * per_thread);
        assert_eq!(counts.rbytes, threads * per_thread * 4);
        assert_eq!(tracker.stats().get(STAT_SUMMARY_FULL), 0);
    }
}
