//! Probe event dispatch and replay
//!
//! Routes recorded probe events to the engine's handlers. Events are
//! spread over worker tasks by thread id, so one thread's entry and exit
//! are always handled in order while different threads run concurrently.

use crate::{
    source::TraceSource,
    types::{Phase, ProbeEvent, TargetMeta},
};
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use nfsops_engine::Tracker;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle, time::interval};

/// Per-worker channel depth
const WORKER_QUEUE_DEPTH: usize = 1024;

/// Traced kernel function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    FileOpen,
    FileRelease,
    Getattr,
    Setattr,
    FileFlush,
    FileMmap,
    FileFsync,
    Lock,
    FileRead,
    FileWrite,
    FileSpliceRead,
    Readdir,
    Create,
    Link,
    Unlink,
    Symlink,
    Lookup,
    Rename,
    DoAccess,
    Listxattr,
    Execve,
}

impl Probe {
    /// Probe attached to a kernel symbol
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let probe = match symbol {
            "nfs_file_open" | "nfs4_file_open" => Probe::FileOpen,
            "nfs_file_release" => Probe::FileRelease,
            "nfs_getattr" => Probe::Getattr,
            "nfs_setattr" => Probe::Setattr,
            "nfs_file_flush" | "nfs4_file_flush" => Probe::FileFlush,
            "nfs_file_mmap" => Probe::FileMmap,
            "nfs_file_fsync" => Probe::FileFsync,
            "nfs_lock" | "nfs_flock" => Probe::Lock,
            "nfs_file_read" => Probe::FileRead,
            "nfs_file_write" => Probe::FileWrite,
            "nfs_file_splice_read" => Probe::FileSpliceRead,
            "nfs_readdir" => Probe::Readdir,
            "nfs_create" => Probe::Create,
            "nfs_link" => Probe::Link,
            "nfs_unlink" => Probe::Unlink,
            "nfs_symlink" => Probe::Symlink,
            "nfs_lookup" => Probe::Lookup,
            "nfs_rename" => Probe::Rename,
            "nfs_do_access" => Probe::DoAccess,
            "nfs3_listxattr" | "nfs4_listxattr" => Probe::Listxattr,
            "execve" | "sys_execve" | "__x64_sys_execve" | "__arm64_sys_execve" => Probe::Execve,
            _ => return None,
        };
        Some(probe)
    }
}

fn required<'a>(target: &'a Option<TargetMeta>, probe: &str) -> Result<&'a TargetMeta> {
    target
        .as_ref()
        .with_context(|| format!("{} entry without target", probe))
}

fn byte_count(bytes: Option<u64>, probe: &str) -> Result<u64> {
    bytes.with_context(|| format!("{} entry without byte count", probe))
}

/// Hand one recorded event to the matching engine handler
pub fn dispatch(tracker: &Tracker, event: &ProbeEvent) -> Result<()> {
    let symbol = event.probe.as_str();
    let probe = Probe::from_symbol(symbol)
        .with_context(|| format!("Unknown probe symbol: {}", symbol))?;

    match &event.phase {
        Phase::Entry {
            target,
            new_target,
            bytes,
        } => {
            let file = || required(target, symbol);
            let node = || required(target, symbol).map(|t| t.handle);

            match probe {
                Probe::FileOpen => tracker.nfs_file_open(event, file()?),
                Probe::FileRelease => tracker.nfs_file_release(event, file()?),
                Probe::Getattr => tracker.nfs_getattr(event, node()?),
                Probe::Setattr => tracker.nfs_setattr(event, node()?),
                Probe::FileFlush => tracker.nfs_file_flush(event, file()?),
                Probe::FileMmap => tracker.nfs_file_mmap(event, file()?),
                Probe::FileFsync => tracker.nfs_file_fsync(event, file()?),
                Probe::Lock => tracker.nfs_lock(event, file()?),
                Probe::FileRead => {
                    tracker.nfs_file_read(event, file()?, byte_count(*bytes, symbol)?)
                }
                Probe::FileWrite => {
                    tracker.nfs_file_write(event, file()?, byte_count(*bytes, symbol)?)
                }
                Probe::FileSpliceRead => {
                    tracker.nfs_file_splice_read(event, file()?, byte_count(*bytes, symbol)?)
                }
                Probe::Readdir => tracker.nfs_readdir(event, file()?),
                Probe::Create => tracker.nfs_create(event, node()?),
                Probe::Link => tracker.nfs_link(event, node()?),
                Probe::Unlink => tracker.nfs_unlink(event, node()?),
                Probe::Symlink => tracker.nfs_symlink(event, node()?),
                Probe::Lookup => tracker.nfs_lookup(event, node()?),
                Probe::Rename => {
                    let new = new_target
                        .as_ref()
                        .with_context(|| format!("{} entry without new_target", symbol))?;
                    tracker.nfs_rename(event, node()?, new.handle)
                }
                Probe::DoAccess => tracker.nfs_do_access(event, node()?),
                Probe::Listxattr => tracker.nfs_listxattr(event, node()?),
                Probe::Execve => bail!("{} is traced on return only", symbol),
            }
        }
        Phase::Exit { rc } => {
            let rc = *rc;
            match probe {
                Probe::FileOpen => tracker.nfs_file_open_ret(event, rc),
                Probe::FileRelease => tracker.nfs_file_release_ret(event, rc),
                Probe::Getattr => tracker.nfs_getattr_ret(event, rc),
                Probe::Setattr => tracker.nfs_setattr_ret(event, rc),
                Probe::FileFlush => tracker.nfs_file_flush_ret(event, rc),
                Probe::FileMmap => tracker.nfs_file_mmap_ret(event, rc),
                Probe::FileFsync => tracker.nfs_file_fsync_ret(event, rc),
                Probe::Lock => tracker.nfs_lock_ret(event, rc),
                Probe::FileRead => tracker.nfs_file_read_ret(event, rc),
                Probe::FileWrite => tracker.nfs_file_write_ret(event, rc),
                Probe::FileSpliceRead => tracker.nfs_file_splice_read_ret(event, rc),
                Probe::Readdir => tracker.nfs_readdir_ret(event, rc),
                Probe::Create => tracker.nfs_create_ret(event, rc),
                Probe::Link => tracker.nfs_link_ret(event, rc),
                Probe::Unlink => tracker.nfs_unlink_ret(event, rc),
                Probe::Symlink => tracker.nfs_symlink_ret(event, rc),
                Probe::Lookup => tracker.nfs_lookup_ret(event, rc),
                Probe::Rename => tracker.nfs_rename_ret(event, rc),
                Probe::DoAccess => tracker.nfs_do_access_ret(event, rc),
                Probe::Listxattr => tracker.nfs_listxattr_ret(event, rc),
                Probe::Execve => tracker.execve_ret(event),
            }
        }
    }

    Ok(())
}

/// Replay outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Events handed to the engine
    pub dispatched: u64,
    /// Events rejected by dispatch
    pub rejected: u64,
    /// Trace lines skipped as malformed
    pub malformed: u64,
}

/// Event processor that replays a trace into the engine
pub struct EventProcessor {
    tracker: Arc<Tracker>,
    workers: usize,
    dispatched: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl EventProcessor {
    /// Create a new event processor
    ///
    /// # Arguments
    ///
    /// * `tracker` - Shared engine
    /// * `workers` - Number of dispatch tasks (at least 1)
    pub fn new(tracker: Arc<Tracker>, workers: usize) -> Self {
        Self {
            tracker,
            workers: workers.max(1),
            dispatched: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replay every event of a trace
    ///
    /// Returns once the trace is exhausted and every worker is done.
    pub async fn replay(&self, mut source: TraceSource) -> Result<ReplayStats> {
        info!("Spawning {} event workers", self.workers);

        let mut senders = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);

        for worker_id in 0..self.workers {
            let (tx, mut rx) = mpsc::channel::<ProbeEvent>(WORKER_QUEUE_DEPTH);
            let tracker = Arc::clone(&self.tracker);
            let dispatched = Arc::clone(&self.dispatched);
            let rejected = Arc::clone(&self.rejected);

            handles.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match dispatch(&tracker, &event) {
                        Ok(()) => {
                            dispatched.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                            warn!("Worker {} skipped event: {:#}", worker_id, e);
                        }
                    }
                }
                debug!("Worker {} finished", worker_id);
            }));
            senders.push(tx);
        }

        let result = async {
            while let Some(event) = source.next_event().await? {
                let worker = event.tid as usize % self.workers;
                if senders[worker].send(event).await.is_err() {
                    bail!("Event worker {} stopped unexpectedly", worker);
                }
            }
            Ok(())
        }
        .await;

        // closing the channels lets the workers drain and exit
        drop(senders);
        for handle in handles {
            handle.await.context("Event worker panicked")?;
        }
        result?;

        let stats = ReplayStats {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: source.malformed(),
        };
        info!(
            "Trace replay finished: {} events, {} rejected, {} malformed lines",
            stats.dispatched, stats.rejected, stats.malformed
        );
        Ok(stats)
    }

    /// Spawn progress reporter
    ///
    /// Creates a task that periodically reports replay progress.
    ///
    /// # Arguments
    ///
    /// * `interval_secs` - Reporting interval in seconds
    pub fn spawn_progress_reporter(&self, interval_secs: u64) -> JoinHandle<()> {
        let tracker = Arc::clone(&self.tracker);
        let dispatched = Arc::clone(&self.dispatched);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
            ticker.tick().await;

            loop {
                ticker.tick().await;
                info!(
                    "📈 Progress: {} events dispatched, {} identities, {} in flight",
                    dispatched.load(Ordering::Relaxed),
                    tracker.summary().len(),
                    tracker.in_flight().len()
                );
            }
        })
    }

    /// Events handed to the engine so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}
