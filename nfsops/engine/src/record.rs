//! Atomic counter bundles of the summary table
//!
//! Each field is an independent monotonic accumulator updated with a
//! relaxed `fetch_add`. Readers may observe a bundle mid-fold.

use nfsops_common::{OpCounts, OpKind, OpStatValues, OP_KIND_COUNT};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one operation kind
#[derive(Debug, Default)]
pub struct OpStat {
    count: AtomicU64,
    errors: AtomicU64,
    duration_ns: AtomicU64,
}

impl OpStat {
    /// Plain copy of the counters
    pub fn load(&self) -> OpStatValues {
        OpStatValues {
            count: self.count.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            duration_ns: self.duration_ns.load(Ordering::Relaxed),
        }
    }
}

/// Counters of every operation kind for one identity
#[derive(Debug, Default)]
pub struct SummaryRecord {
    ops: [OpStat; OP_KIND_COUNT],
    rbytes: AtomicU64,
    wbytes: AtomicU64,
}

impl SummaryRecord {
    /// Zeroed record
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed operation
    ///
    /// `bytes` is only accumulated for read and write.
    pub fn fold(&self, op: OpKind, duration_ns: u64, is_error: bool, bytes: Option<u64>) {
        let stat = &self.ops[op.index()];
        stat.count.fetch_add(1, Ordering::Relaxed);
        if is_error {
            stat.errors.fetch_add(1, Ordering::Relaxed);
        }
        stat.duration_ns.fetch_add(duration_ns, Ordering::Relaxed);
        self.add_bytes(op, bytes);
    }

    /// Count one operation without duration or outcome
    pub fn count(&self, op: OpKind, bytes: Option<u64>) {
        self.ops[op.index()].count.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(op, bytes);
    }

    #[inline]
    fn add_bytes(&self, op: OpKind, bytes: Option<u64>) {
        let Some(bytes) = bytes else { return };
        match op {
            OpKind::Read => {
                self.rbytes.fetch_add(bytes, Ordering::Relaxed);
            }
            OpKind::Write => {
                self.wbytes.fetch_add(bytes, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Counters of one kind
    pub fn stat(&self, op: OpKind) -> &OpStat {
        &self.ops[op.index()]
    }

    /// Plain copy of every counter
    pub fn load(&self) -> OpCounts {
        let mut counts = OpCounts::default();
        for (dst, src) in counts.ops.iter_mut().zip(self.ops.iter()) {
            *dst = src.load();
        }
        counts.rbytes = self.rbytes.load(Ordering::Relaxed);
        counts.wbytes = self.wbytes.load(Ordering::Relaxed);
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_accumulates_fields() {
        let record = SummaryRecord::new();
        record.fold(OpKind::Open, 100, false, None);
        record.fold(OpKind::Open, 250, true, None);

        let open = record.stat(OpKind::Open).load();
        assert_eq!(open.count, 2);
        assert_eq!(open.errors, 1);
        assert_eq!(open.duration_ns, 350);
    }

    #[test]
    fn test_bytes_only_count_for_read_and_write() {
        let record = SummaryRecord::new();
        record.fold(OpKind::Read, 1, false, Some(100));
        record.fold(OpKind::Write, 1, false, Some(30));
        record.fold(OpKind::Write, 1, true, Some(20));
        record.fold(OpKind::Getattr, 1, false, Some(999));

        let counts = record.load();
        assert_eq!(counts.rbytes, 100);
        assert_eq!(counts.wbytes, 50);
        assert_eq!(counts.get(OpKind::Write).errors, 1);
    }

    #[test]
    fn test_count_skips_duration_and_errors() {
        let record = SummaryRecord::new();
        record.count(OpKind::Read, Some(4096));
        record.count(OpKind::Close, None);

        let counts = record.load();
        assert_eq!(
            *counts.get(OpKind::Read),
            OpStatValues { count: 1, errors: 0, duration_ns: 0 }
        );
        assert_eq!(counts.get(OpKind::Close).count, 1);
        assert_eq!(counts.rbytes, 4096);
    }
}
