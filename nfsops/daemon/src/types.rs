//! Userspace type definitions
//!
//! Defines the recorded probe events consumed by the replay and the
//! report structures produced by the collector.
//!
//! ## Organization
//!
//! - **Engine Types**: plain data shared with the engine (from nfsops_common)
//! - **Trace Types**: one recorded probe firing per JSON line
//! - **Report Types**: samples handed to the exporters

use nfsops_engine::ProbeContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Engine Types
// ============================================================================

pub mod engine {
    //! Types shared between the engine and the reader
    //!
    //! Re-exported from the nfsops-common crate.

    pub use nfsops_common::constants;
    pub use nfsops_common::{Comm, LaunchEvent, OpCounts, OpKind, StatsKey, TargetHandle, TargetMeta};
}

pub use engine::{Comm, OpCounts, OpKind, StatsKey, TargetHandle, TargetMeta};

// ============================================================================
// Trace Types
// ============================================================================

/// One recorded probe firing
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProbeEvent {
    /// Monotonic timestamp in nanoseconds
    #[serde(default)]
    pub ts_ns: u64,
    /// Process id (thread-group id)
    pub pid: u32,
    /// Thread id
    pub tid: u32,
    /// User id
    #[serde(default)]
    pub uid: u32,
    /// Group id
    #[serde(default)]
    pub gid: u32,
    /// Command name
    #[serde(default)]
    pub comm: String,
    /// Traced kernel symbol
    pub probe: String,
    /// Entry or exit payload
    #[serde(flatten)]
    pub phase: Phase,
}

/// Side of the traced call a probe fired on
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum Phase {
    /// Function entry
    Entry {
        /// Open file or inode the call operates on
        #[serde(default)]
        target: Option<TargetMeta>,
        /// Destination of a rename
        #[serde(default)]
        new_target: Option<TargetMeta>,
        /// Requested byte count of a read or write
        #[serde(default)]
        bytes: Option<u64>,
    },
    /// Function return
    Exit {
        /// Raw return value
        #[serde(default)]
        rc: i64,
    },
}

impl ProbeContext for ProbeEvent {
    fn pid_tgid(&self) -> u64 {
        ((self.pid as u64) << 32) | self.tid as u64
    }

    fn uid_gid(&self) -> u64 {
        ((self.gid as u64) << 32) | self.uid as u64
    }

    fn comm(&self) -> Comm {
        Comm::new(self.comm.as_bytes())
    }

    fn ktime_ns(&self) -> u64 {
        self.ts_ns
    }
}

// ============================================================================
// Report Types
// ============================================================================

/// Environment tags of a process
pub type Tags = BTreeMap<String, String>;

/// Counters of one operation kind in a report
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OpReport {
    /// Completed operations
    pub count: u64,
    /// Failed operations
    pub errors: u64,
    /// Cumulative duration in seconds
    pub duration: f64,
}

/// Statistics of one process (or command, when pids are squashed)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatRow {
    /// RFC 3339 collection time
    pub timestamp: String,
    /// Host the statistics were collected on
    pub hostname: String,
    /// Process id, 0 when squashed
    pub pid: u32,
    /// User id
    pub uid: u32,
    /// Command name
    pub comm: String,
    /// NFS mount point of the volume
    pub mount: String,
    /// Tracked environment variables of the process
    pub tags: Tags,
    /// Per-operation counters, keyed by operation name
    pub ops: BTreeMap<String, OpReport>,
    /// Bytes requested by reads
    pub read_bytes: u64,
    /// Bytes requested by writes
    pub write_bytes: u64,
}

impl StatRow {
    /// Total operations across all kinds
    pub fn total_ops(&self) -> u64 {
        self.ops.values().map(|op| op.count).sum()
    }
}

/// One collection cycle
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Sample {
    /// RFC 3339 collection time
    pub timestamp: String,
    /// Collection interval in seconds
    pub interval_secs: u64,
    /// Statistics rows
    pub rows: Vec<StatRow>,
    /// Engine health counters, keyed by name
    pub engine: BTreeMap<String, u64>,
}

/// Convert nanoseconds to seconds
pub fn nstosec(ns: u64) -> f64 {
    ns as f64 / 1_000_000_000.0
}

/// Build the per-operation report of a counter snapshot
pub fn op_reports(counts: &OpCounts) -> BTreeMap<String, OpReport> {
    OpKind::ALL
        .iter()
        .map(|op| {
            let stat = counts.get(*op);
            (
                op.name().to_string(),
                OpReport {
                    count: stat.count,
                    errors: stat.errors,
                    duration: nstosec(stat.duration_ns),
                },
            )
        })
        .collect()
}
