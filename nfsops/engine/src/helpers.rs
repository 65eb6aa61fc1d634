//! Helper functions for probe handlers
//!
//! Provides the task context seam and the identity derivation shared by
//! every handler.

use nfsops_common::{Comm, ExecKey, StatsKey};

/// Running task as seen by a probe
///
/// Mirrors the kernel helpers a probe calls on the current task. The
/// attachment layer implements it for whatever carries that state.
pub trait ProbeContext {
    /// Process id in the upper 32 bits, thread id in the lower 32 bits
    fn pid_tgid(&self) -> u64;

    /// Group id in the upper 32 bits, user id in the lower 32 bits
    fn uid_gid(&self) -> u64;

    /// Command name of the task
    fn comm(&self) -> Comm;

    /// Monotonic timestamp in nanoseconds
    fn ktime_ns(&self) -> u64;
}

/// Get current process ID
#[inline(always)]
pub fn get_pid<C: ProbeContext + ?Sized>(ctx: &C) -> u32 {
    (ctx.pid_tgid() >> 32) as u32
}

/// Get current thread ID
#[inline(always)]
pub fn get_tid<C: ProbeContext + ?Sized>(ctx: &C) -> u32 {
    (ctx.pid_tgid() & 0xFFFFFFFF) as u32
}

/// Get current user ID
#[inline(always)]
pub fn get_uid<C: ProbeContext + ?Sized>(ctx: &C) -> u32 {
    (ctx.uid_gid() & 0xFFFFFFFF) as u32
}

/// Execution context key of the current task
#[inline(always)]
pub fn exec_key<C: ProbeContext + ?Sized>(ctx: &C) -> ExecKey {
    ExecKey::from_pid_tgid(ctx.pid_tgid())
}

/// Build the aggregation identity of the current task
///
/// The volume comes from the operation's target, never from the task.
#[inline]
pub fn stats_key<C: ProbeContext + ?Sized>(ctx: &C, volume: Option<u32>) -> StatsKey {
    StatsKey {
        pid: get_pid(ctx),
        tid: get_tid(ctx),
        uid: get_uid(ctx),
        comm: ctx.comm(),
        volume,
    }
}

/// Nanoseconds between entry and exit
///
/// A clock that went backwards yields 0.
#[inline(always)]
pub fn elapsed_ns(start_ns: u64, now_ns: u64) -> u64 {
    now_ns.saturating_sub(start_ns)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Task with a hand-driven clock
    pub struct FakeTask {
        pub pid: u32,
        pub tid: u32,
        pub uid: u32,
        pub comm: Comm,
        pub now: AtomicU64,
    }

    impl FakeTask {
        pub fn new(pid: u32, tid: u32) -> Self {
            Self {
                pid,
                tid,
                uid: 1000,
                comm: Comm::new(b"fio"),
                now: AtomicU64::new(1_000),
            }
        }

        pub fn advance(&self, ns: u64) {
            self.now.fetch_add(ns, Ordering::Relaxed);
        }
    }

    impl ProbeContext for FakeTask {
        fn pid_tgid(&self) -> u64 {
            ((self.pid as u64) << 32) | self.tid as u64
        }

        fn uid_gid(&self) -> u64 {
            (100u64 << 32) | self.uid as u64
        }

        fn comm(&self) -> Comm {
            self.comm
        }

        fn ktime_ns(&self) -> u64 {
            self.now.load(Ordering::Relaxed)
        }
    }
}
