//! Process environment tags
//!
//! On every process launch the reader looks up the new image's
//! environment and keeps the variables matching the configured prefixes.
//! Rows of that process are decorated with them.

use crate::types::Tags;
use log::debug;
use std::{
    collections::HashMap,
    path::PathBuf,
    time::{Duration, Instant},
};

/// Extract the variables whose names start with one of `prefixes`
///
/// `environ` is the NUL separated `NAME=value` list of `/proc/<pid>/environ`.
pub fn parse_environ(environ: &[u8], prefixes: &[String]) -> Tags {
    String::from_utf8_lossy(environ)
        .split('\0')
        .filter_map(|entry| entry.split_once('='))
        .filter(|(name, _)| prefixes.iter().any(|p| name.starts_with(p.as_str())))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Tracked environment variables per pid
pub struct PidEnvMap {
    prefixes: Vec<String>,
    pids: HashMap<u32, Tags>,
    proc_root: PathBuf,
    vacuum_interval: Duration,
    last_vacuum: Instant,
}

impl PidEnvMap {
    /// Create a map tracking `prefixes`, vacuumed every `vacuum_interval`
    pub fn new(prefixes: Vec<String>, vacuum_interval: Duration) -> Self {
        Self::with_proc_root(prefixes, vacuum_interval, PathBuf::from("/proc"))
    }

    /// Create a map reading process state below `proc_root`
    pub fn with_proc_root(
        prefixes: Vec<String>,
        vacuum_interval: Duration,
        proc_root: PathBuf,
    ) -> Self {
        Self {
            prefixes,
            pids: HashMap::new(),
            proc_root,
            vacuum_interval,
            last_vacuum: Instant::now(),
        }
    }

    /// Whether any variable is tracked at all
    pub fn is_enabled(&self) -> bool {
        !self.prefixes.is_empty()
    }

    /// Read the environment of a freshly launched process
    ///
    /// Returns whether matching variables were found. A process that
    /// already exited is skipped.
    pub fn track(&mut self, pid: u32) -> bool {
        let path = self.proc_root.join(pid.to_string()).join("environ");
        let environ = match std::fs::read(&path) {
            Ok(environ) => environ,
            Err(e) => {
                debug!("Cannot read environment of pid {}: {}", pid, e);
                return false;
            }
        };

        let tags = parse_environ(&environ, &self.prefixes);
        if tags.is_empty() {
            return false;
        }

        debug!("Tracking pid {} with {} tags", pid, tags.len());
        self.pids.insert(pid, tags);
        true
    }

    /// Insert tags directly
    pub fn insert(&mut self, pid: u32, tags: Tags) {
        self.pids.insert(pid, tags);
    }

    /// Tags of a process, empty when unknown
    pub fn get(&self, pid: u32) -> Tags {
        self.pids.get(&pid).cloned().unwrap_or_default()
    }

    /// Drop entries of processes that no longer exist
    pub fn vacuum(&mut self) {
        let root = &self.proc_root;
        let before = self.pids.len();
        self.pids
            .retain(|pid, _| root.join(pid.to_string()).exists());
        self.last_vacuum = Instant::now();
        debug!("Vacuumed {} exited pids", before - self.pids.len());
    }

    /// Vacuum when the interval has elapsed
    pub fn vacuum_if_needed(&mut self) {
        if self.last_vacuum.elapsed() >= self.vacuum_interval {
            self.vacuum();
        }
    }

    /// Number of tracked processes
    pub fn len(&self) -> usize {
        self.pids.len()
    }

    /// Whether no process is tracked
    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}
