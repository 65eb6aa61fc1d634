//! Shared constants for the NFS operation tracker
//!
//! These constants are used by both the engine and the userspace reader
//! to keep table limits and counter layouts consistent.

// ============================================================================
// Table Sizes
// ============================================================================

/// Maximum number of operations tracked between entry and exit
pub const MAX_IN_FLIGHT: u32 = 10240;

/// Maximum number of aggregation identities in the summary table
pub const MAX_IDENTITIES: u32 = 10240;

/// Maximum number of pending process-launch notifications
pub const MAX_LAUNCH_EVENTS: u32 = 1024;

// ============================================================================
// Task Identity
// ============================================================================

/// Length of the kernel task command name, including the trailing NUL
pub const TASK_COMM_LEN: usize = 16;

// ============================================================================
// Inode Mode Bits (from linux/stat.h)
// ============================================================================

/// Mask selecting the file type bits of an inode mode
pub const S_IFMT: u32 = 0o170_000;

/// Regular file
pub const S_IFREG: u32 = 0o100_000;

/// Directory
pub const S_IFDIR: u32 = 0o040_000;

/// Symbolic link
pub const S_IFLNK: u32 = 0o120_000;

// ============================================================================
// Return Codes
// ============================================================================

/// Largest errno a kernel call encodes in a negative return (`linux/err.h`)
pub const MAX_ERRNO: i64 = 4095;

// ============================================================================
// Device Numbers
// ============================================================================

/// Number of bits used by the minor part of a kernel `dev_t`
pub const MINORBITS: u32 = 20;

/// Mask selecting the minor part of a kernel `dev_t`
pub const MINORMASK: u32 = (1 << MINORBITS) - 1;

// ============================================================================
// Engine Statistics Counter Indices
// ============================================================================

/// Number of entry events seen by the handlers
pub const STAT_ENTRY_EVENTS: u32 = 0;

/// Number of exit events seen by the handlers
pub const STAT_EXIT_EVENTS: u32 = 1;

/// Number of entries rejected by the target filter
pub const STAT_FILTERED: u32 = 2;

/// Number of exits without a matching in-flight record
pub const STAT_CORRELATION_MISSES: u32 = 3;

/// Number of entries dropped because the in-flight table was full
pub const STAT_IN_FLIGHT_FULL: u32 = 4;

/// Number of completed operations dropped because the summary table was full
pub const STAT_SUMMARY_FULL: u32 = 5;

/// Number of process-launch notifications queued
pub const STAT_LAUNCH_EVENTS: u32 = 6;

/// Number of process-launch notifications dropped on a full queue
pub const STAT_LAUNCH_DROPPED: u32 = 7;

/// Number of entries that replaced an orphaned record on the same thread
pub const STAT_IN_FLIGHT_REPLACED: u32 = 8;

/// Total number of statistics counters
pub const MAX_STATS: u32 = 9;

/// Report names of the statistics counters, indexed by `STAT_*`
pub const STAT_NAMES: [&str; MAX_STATS as usize] = [
    "entry_events",
    "exit_events",
    "filtered",
    "correlation_misses",
    "in_flight_full",
    "summary_full",
    "launch_events",
    "launch_dropped",
    "in_flight_replaced",
];
