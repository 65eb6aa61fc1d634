//! Shared data structures between the engine and userspace
//!
//! Keys are small `Copy` values so they can be hashed and moved into
//! table slots without allocation.

use crate::constants::{S_IFMT, TASK_COMM_LEN};
use crate::ops::{OpKind, OP_KIND_COUNT};

/// Execution context key
///
/// Identifies one schedulable thread of control. Derived from the low
/// half of the kernel `pid_tgid` value, i.e. the thread id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecKey(pub u32);

impl ExecKey {
    /// Build a key from a packed `pid_tgid` value
    #[inline]
    pub const fn from_pid_tgid(pid_tgid: u64) -> Self {
        Self((pid_tgid & 0xFFFF_FFFF) as u32)
    }

    /// Thread id of this context
    #[inline]
    pub const fn tid(self) -> u32 {
        self.0
    }
}

/// In-flight table key
///
/// A thread holds at most one outstanding operation per kind, so the
/// slot is scoped by both the execution context and the operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InFlightKey {
    /// Thread that issued the operation
    pub ctx: ExecKey,
    /// Operation category sharing the slot
    pub op: OpKind,
}

/// Opaque reference to an operation's subject
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "userspace",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct TargetHandle {
    /// Inode number
    pub ino: u64,
    /// Device number of the owning superblock (`major << 20 | minor`)
    pub dev: u32,
}

impl TargetHandle {
    /// Create a new handle
    pub const fn new(ino: u64, dev: u32) -> Self {
        Self { ino, dev }
    }
}

/// Target metadata available at entry time for handle-based operations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "userspace",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct TargetMeta {
    /// Handle of the inode behind the open file
    #[cfg_attr(feature = "userspace", serde(flatten))]
    pub handle: TargetHandle,
    /// Inode mode (type and permission bits)
    pub mode: u32,
    /// Length of the dentry name
    pub name_len: u32,
}

impl TargetMeta {
    /// File type bits of the inode mode
    #[inline]
    pub const fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }
}

/// Provisional record bridging an operation's entry and exit
///
/// Written once at entry and moved out once at exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InFlightRecord {
    /// Subject of the operation
    pub target: TargetHandle,
    /// Monotonic timestamp at entry (nanoseconds)
    pub start_ns: u64,
    /// Size known at entry (requested byte count for read/write)
    pub byte_hint: Option<u64>,
}

/// Bounded command name snapshot, NUL padded
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Comm([u8; TASK_COMM_LEN]);

impl Comm {
    /// Snapshot a command name, truncating it like the kernel does
    pub fn new(name: &[u8]) -> Self {
        let mut buf = [0u8; TASK_COMM_LEN];
        let len = name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name.len())
            .min(TASK_COMM_LEN - 1);
        buf[..len].copy_from_slice(&name[..len]);
        Self(buf)
    }

    /// Name bytes without the NUL padding
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(TASK_COMM_LEN);
        &self.0[..len]
    }
}

impl core::fmt::Debug for Comm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match core::str::from_utf8(self.as_bytes()) {
            Ok(name) => write!(f, "Comm({:?})", name),
            Err(_) => write!(f, "Comm({:?})", self.as_bytes()),
        }
    }
}

/// Aggregation identity, the summary table key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatsKey {
    /// Process id (thread-group id)
    pub pid: u32,
    /// Thread id
    pub tid: u32,
    /// Owning user id
    pub uid: u32,
    /// Command name at aggregation time
    pub comm: Comm,
    /// Device number of the target's volume, when tracked
    pub volume: Option<u32>,
}

/// Plain counter values of one operation kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpStatValues {
    /// Number of completed operations
    pub count: u64,
    /// Number of failed operations
    pub errors: u64,
    /// Cumulative duration (nanoseconds)
    pub duration_ns: u64,
}

impl OpStatValues {
    /// Add another bundle into this one
    #[inline]
    pub fn merge(&mut self, other: &OpStatValues) {
        self.count += other.count;
        self.errors += other.errors;
        self.duration_ns += other.duration_ns;
    }
}

/// Snapshot of one summary record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpCounts {
    /// One bundle per operation kind, indexed by `OpKind::index`
    pub ops: [OpStatValues; OP_KIND_COUNT],
    /// Total bytes requested by reads
    pub rbytes: u64,
    /// Total bytes requested by writes
    pub wbytes: u64,
}

impl OpCounts {
    /// Counter bundle of one kind
    #[inline]
    pub fn get(&self, op: OpKind) -> &OpStatValues {
        &self.ops[op.index()]
    }

    /// Mutable counter bundle of one kind
    #[inline]
    pub fn get_mut(&mut self, op: OpKind) -> &mut OpStatValues {
        &mut self.ops[op.index()]
    }

    /// Add another snapshot into this one
    pub fn merge(&mut self, other: &OpCounts) {
        for (mine, theirs) in self.ops.iter_mut().zip(other.ops.iter()) {
            mine.merge(theirs);
        }
        self.rbytes += other.rbytes;
        self.wbytes += other.wbytes;
    }

    /// Total number of operations across all kinds
    pub fn total_count(&self) -> u64 {
        self.ops.iter().map(|s| s.count).sum()
    }

    /// Total number of failed operations across all kinds
    pub fn total_errors(&self) -> u64 {
        self.ops.iter().map(|s| s.errors).sum()
    }
}

/// Process-launch notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchEvent {
    /// Process that loaded a new program image
    pub pid: u32,
}
