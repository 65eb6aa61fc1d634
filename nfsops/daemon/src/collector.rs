//! Statistics collection and aggregation
//!
//! Drains the engine's summary table, resolves mounts and tags, groups
//! rows and applies the tag filter and anonymization.

use crate::{
    envs::PidEnvMap,
    mounts::MountsMap,
    types::*,
};
use anyhow::{bail, Result};
use log::debug;
use nfsops_engine::Tracker;
use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
    sync::Arc,
};

/// How rows are kept based on their tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFilter {
    /// At least one configured variable present
    Any,
    /// Every configured variable present
    All,
}

impl FromStr for TagFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "any" => Ok(TagFilter::Any),
            "all" => Ok(TagFilter::All),
            _ => bail!("Unsupported tag filter: {}. Use any or all", s),
        }
    }
}

impl TagFilter {
    /// Whether a row carrying `tags` passes the filter
    pub fn matches(self, tags: &Tags, envs: &[String]) -> bool {
        let present = |env: &String| tags.keys().any(|k| k.starts_with(env.as_str()));
        match self {
            TagFilter::Any => envs.iter().any(present),
            TagFilter::All => envs.iter().all(present),
        }
    }
}

/// Row field that can be blanked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnonField {
    Comm,
    Mount,
    Pid,
    Uid,
    Tags,
}

impl FromStr for AnonField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "COMM" => Ok(AnonField::Comm),
            "MOUNT" => Ok(AnonField::Mount),
            "PID" => Ok(AnonField::Pid),
            "UID" => Ok(AnonField::Uid),
            "TAGS" => Ok(AnonField::Tags),
            _ => bail!(
                "Invalid anonymized field: {}. Use COMM, MOUNT, PID, UID or TAGS",
                s
            ),
        }
    }
}

impl AnonField {
    /// Blank this field of a row
    pub fn apply(self, row: &mut StatRow) {
        match self {
            AnonField::Comm => row.comm = "--".to_string(),
            AnonField::Mount => row.mount = "--".to_string(),
            AnonField::Pid => row.pid = 0,
            AnonField::Uid => row.uid = 0,
            AnonField::Tags => row.tags.clear(),
        }
    }
}

/// Collection behaviour
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    /// Remove identities from the engine on every collection
    pub drain: bool,
    /// Group by command, mount and tags instead of by process
    pub squash_pid: bool,
    /// Tracked environment variable prefixes
    pub envs: Vec<String>,
    /// Tag based row filter
    pub tag_filter: Option<TagFilter>,
    /// Fields blanked in every row
    pub anon_fields: BTreeSet<AnonField>,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            drain: true,
            squash_pid: true,
            envs: Vec::new(),
            tag_filter: None,
            anon_fields: BTreeSet::new(),
        }
    }
}

/// Grouping key of statistics rows
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    pid: u32,
    uid: u32,
    comm: Option<String>,
    mount: String,
    tags: Option<Tags>,
}

/// Rows merged under one group key
struct Group {
    comm: String,
    tags: Tags,
    counts: OpCounts,
}

/// Metrics collector reading the engine's tables
pub struct StatsCollector {
    tracker: Arc<Tracker>,
    options: CollectorOptions,
    mounts: MountsMap,
    envs: PidEnvMap,
    hostname: String,
    totals: OpCounts,
    samples: u64,
}

impl StatsCollector {
    /// Create a new collector
    pub fn new(
        tracker: Arc<Tracker>,
        options: CollectorOptions,
        mounts: MountsMap,
        envs: PidEnvMap,
    ) -> Self {
        Self {
            tracker,
            options,
            mounts,
            envs,
            hostname: local_hostname(),
            totals: OpCounts::default(),
            samples: 0,
        }
    }

    /// Override the reported host name
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Refresh tags from pending launch notifications
    fn track_launches(&mut self) {
        let launches = self.tracker.launches().drain();
        if !self.envs.is_enabled() {
            return;
        }
        for launch in launches {
            self.envs.track(launch.pid);
        }
        self.envs.vacuum_if_needed();
    }

    /// Collect one sample
    ///
    /// # Arguments
    ///
    /// * `interval_secs` - Collection interval reported with the sample
    pub fn collect(&mut self, interval_secs: u64) -> Sample {
        self.track_launches();

        let entries = if self.options.drain {
            self.tracker.summary().drain()
        } else {
            self.tracker.summary().snapshot()
        };

        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut groups: BTreeMap<GroupKey, Group> = BTreeMap::new();
        let mut cycle = OpCounts::default();

        for (key, counts) in entries {
            cycle.merge(&counts);

            let mount = key
                .volume
                .and_then(|dev| self.mounts.resolve(dev))
                .unwrap_or_default();
            let comm = String::from_utf8_lossy(key.comm.as_bytes()).into_owned();
            let tags = self.envs.get(key.pid);

            let group_key = if self.options.squash_pid {
                GroupKey {
                    pid: 0,
                    uid: key.uid,
                    comm: Some(comm.clone()),
                    mount,
                    tags: Some(tags.clone()),
                }
            } else {
                GroupKey {
                    pid: key.pid,
                    uid: key.uid,
                    comm: None,
                    mount,
                    tags: None,
                }
            };

            groups
                .entry(group_key)
                .and_modify(|g| g.counts.merge(&counts))
                .or_insert(Group {
                    comm,
                    tags,
                    counts,
                });
        }

        // a snapshot already holds everything seen so far
        if self.options.drain {
            self.totals.merge(&cycle);
        } else {
            self.totals = cycle;
        }

        let mut rows = Vec::with_capacity(groups.len());
        for (key, group) in groups {
            if let Some(filter) = self.options.tag_filter {
                if !filter.matches(&group.tags, &self.options.envs) {
                    continue;
                }
            }

            let mut row = StatRow {
                timestamp: timestamp.clone(),
                hostname: self.hostname.clone(),
                pid: key.pid,
                uid: key.uid,
                comm: group.comm,
                mount: key.mount,
                tags: group.tags,
                ops: op_reports(&group.counts),
                read_bytes: group.counts.rbytes,
                write_bytes: group.counts.wbytes,
            };
            for field in &self.options.anon_fields {
                field.apply(&mut row);
            }
            rows.push(row);
        }

        self.samples += 1;
        debug!("Collected {} rows", rows.len());

        Sample {
            timestamp,
            interval_secs,
            rows,
            engine: self
                .tracker
                .stats()
                .snapshot()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    /// Counters of every identity collected so far
    pub fn totals(&self) -> &OpCounts {
        &self.totals
    }

    /// Number of samples collected so far
    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    /// Environment tags map
    pub fn envs_mut(&mut self) -> &mut PidEnvMap {
        &mut self.envs
    }
}

/// Host name of this machine
fn local_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }

    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfsops_engine::TrackerConfig;
    use std::{io::Write, path::PathBuf, time::Duration};

    struct Task {
        pid: u32,
        tid: u32,
        uid: u32,
        comm: &'static [u8],
        now: u64,
    }

    impl nfsops_engine::ProbeContext for Task {
        fn pid_tgid(&self) -> u64 {
            ((self.pid as u64) << 32) | self.tid as u64
        }
        fn uid_gid(&self) -> u64 {
            self.uid as u64
        }
        fn comm(&self) -> Comm {
            Comm::new(self.comm)
        }
        fn ktime_ns(&self) -> u64 {
            self.now
        }
    }

    fn task(pid: u32, tid: u32, comm: &'static [u8]) -> Task {
        Task { pid, tid, uid: 1000, comm, now: 0 }
    }

    fn read_on(tracker: &Tracker, task: &mut Task, dev: u32, bytes: u64) {
        let file = TargetMeta {
            handle: TargetHandle::new(1, dev),
            mode: engine::constants::S_IFREG,
            name_len: 3,
        };
        tracker.nfs_file_read(&*task, &file, bytes);
        task.now += 1_000;
        tracker.nfs_file_read_ret(&*task, bytes as i64);
    }

    fn mounts() -> (tempfile::NamedTempFile, MountsMap) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "36 22 0:52 / /mnt/a rw - nfs4 srv:/a rw").unwrap();
        writeln!(file, "37 22 0:53 / /mnt/b rw - nfs4 srv:/b rw").unwrap();
        file.flush().unwrap();
        let map = MountsMap::with_path(file.path().to_path_buf());
        (file, map)
    }

    fn envs() -> PidEnvMap {
        PidEnvMap::with_proc_root(
            vec!["JOB".to_string()],
            Duration::from_secs(600),
            PathBuf::from("/nonexistent"),
        )
    }

    fn collector(tracker: &Arc<Tracker>, options: CollectorOptions) -> (tempfile::NamedTempFile, StatsCollector) {
        let (file, mounts) = mounts();
        let collector = StatsCollector::new(Arc::clone(tracker), options, mounts, envs())
            .with_hostname("node1");
        (file, collector)
    }

    #[test]
    fn test_threads_of_a_process_are_merged_per_mount() {
        let tracker = Arc::new(Tracker::new(TrackerConfig::new()));
        let options = CollectorOptions {
            squash_pid: false,
            ..Default::default()
        };
        let (_file, mut collector) = collector(&tracker, options);

        read_on(&tracker, &mut task(10, 10, b"dd"), 52, 100);
        read_on(&tracker, &mut task(10, 11, b"dd"), 52, 50);
        read_on(&tracker, &mut task(10, 11, b"dd"), 53, 7);

        let sample = collector.collect(5);
        assert_eq!(sample.rows.len(), 2);

        let a = sample.rows.iter().find(|r| r.mount == "/mnt/a").unwrap();
        assert_eq!(a.pid, 10);
        assert_eq!(a.comm, "dd");
        assert_eq!(a.hostname, "node1");
        assert_eq!(a.ops["read"].count, 2);
        assert_eq!(a.read_bytes, 150);

        assert!(tracker.summary().is_empty());
        assert_eq!(sample.engine["exit_events"], 3);
        assert_eq!(collector.totals().rbytes, 157);
    }

    #[test]
    fn test_threads_with_different_users_stay_apart() {
        let tracker = Arc::new(Tracker::new(TrackerConfig::new()));
        let options = CollectorOptions {
            squash_pid: false,
            ..Default::default()
        };
        let (_file, mut collector) = collector(&tracker, options);

        let mut root_thread = Task { uid: 0, ..task(10, 11, b"nfsd") };
        read_on(&tracker, &mut task(10, 10, b"nfsd"), 52, 100);
        read_on(&tracker, &mut root_thread, 52, 9);

        let sample = collector.collect(5);
        assert_eq!(sample.rows.len(), 2);

        let user = sample.rows.iter().find(|r| r.uid == 1000).unwrap();
        let root = sample.rows.iter().find(|r| r.uid == 0).unwrap();
        assert_eq!((user.pid, user.read_bytes), (10, 100));
        assert_eq!((root.pid, root.read_bytes), (10, 9));
    }

    #[test]
    fn test_squash_pid_groups_by_command() {
        let tracker = Arc::new(Tracker::new(TrackerConfig::new()));
        let (_file, mut collector) = collector(&tracker, CollectorOptions::default());

        read_on(&tracker, &mut task(10, 10, b"dd"), 52, 1);
        read_on(&tracker, &mut task(20, 20, b"dd"), 52, 2);
        read_on(&tracker, &mut task(30, 30, b"cp"), 52, 4);

        let sample = collector.collect(5);
        assert_eq!(sample.rows.len(), 2);
        let dd = sample.rows.iter().find(|r| r.comm == "dd").unwrap();
        assert_eq!(dd.pid, 0);
        assert_eq!(dd.read_bytes, 3);
    }

    #[test]
    fn test_snapshot_mode_keeps_identities() {
        let tracker = Arc::new(Tracker::new(TrackerConfig::new()));
        let options = CollectorOptions {
            drain: false,
            ..Default::default()
        };
        let (_file, mut collector) = collector(&tracker, options);

        read_on(&tracker, &mut task(10, 10, b"dd"), 52, 1);
        collector.collect(5);
        collector.collect(5);
        assert_eq!(tracker.summary().len(), 1);
        assert_eq!(collector.totals().rbytes, 1);
        assert_eq!(collector.sample_count(), 2);
    }

    #[test]
    fn test_tag_filter() {
        let tracker = Arc::new(Tracker::new(TrackerConfig::new()));
        let options = CollectorOptions {
            squash_pid: false,
            envs: vec!["JOB".to_string(), "USER_TAG".to_string()],
            tag_filter: Some(TagFilter::Any),
            ..Default::default()
        };
        let (_file, mut collector) = collector(&tracker, options);

        let mut tags = Tags::new();
        tags.insert("JOB_ID".to_string(), "7".to_string());
        collector.envs_mut().insert(10, tags);

        read_on(&tracker, &mut task(10, 10, b"dd"), 52, 1);
        read_on(&tracker, &mut task(20, 20, b"dd"), 52, 1);

        let sample = collector.collect(5);
        assert_eq!(sample.rows.len(), 1);
        assert_eq!(sample.rows[0].pid, 10);
        assert_eq!(sample.rows[0].tags["JOB_ID"], "7");
    }

    #[test]
    fn test_tag_filter_all_requires_every_variable() {
        let envs = vec!["JOB".to_string(), "USER".to_string()];
        let mut tags = Tags::new();
        tags.insert("JOB_ID".to_string(), "1".to_string());

        assert!(TagFilter::Any.matches(&tags, &envs));
        assert!(!TagFilter::All.matches(&tags, &envs));

        tags.insert("USER".to_string(), "ann".to_string());
        assert!(TagFilter::All.matches(&tags, &envs));
    }

    #[test]
    fn test_anonymization() {
        let tracker = Arc::new(Tracker::new(TrackerConfig::new()));
        let options = CollectorOptions {
            squash_pid: false,
            anon_fields: ["COMM", "pid", "Mount", "UID"]
                .iter()
                .map(|f| f.parse().unwrap())
                .collect(),
            ..Default::default()
        };
        let (_file, mut collector) = collector(&tracker, options);

        read_on(&tracker, &mut task(10, 10, b"secret"), 52, 1);

        let sample = collector.collect(5);
        let row = &sample.rows[0];
        assert_eq!(row.comm, "--");
        assert_eq!(row.mount, "--");
        assert_eq!(row.pid, 0);
        assert_eq!(row.uid, 0);
        assert_eq!(row.ops["read"].count, 1);
    }

    #[test]
    fn test_parse_options() {
        assert_eq!("ALL".parse::<TagFilter>().unwrap(), TagFilter::All);
        assert!("some".parse::<TagFilter>().is_err());
        assert_eq!(" tags ".parse::<AnonField>().unwrap(), AnonField::Tags);
        assert!("REMOTE".parse::<AnonField>().is_err());
    }
}
