//! NFS mount resolution
//!
//! Maps the device number recorded with each identity to the mount point
//! of the NFS volume, read from `/proc/self/mountinfo`.

use anyhow::{Context, Result};
use log::{debug, warn};
use nfsops_common::constants::{MINORBITS, MINORMASK};
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    time::{Duration, Instant},
};

/// Default mount table location
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Kernel device number as `major:minor`
pub fn devt_to_str(dev: u32) -> String {
    format!("{}:{}", dev >> MINORBITS, dev & MINORMASK)
}

/// Kernel device number of a `major:minor` pair
pub fn parse_devt(s: &str) -> Option<u32> {
    let (major, minor) = s.split_once(':')?;
    let major: u32 = major.parse().ok()?;
    let minor: u32 = minor.parse().ok()?;
    Some((major << MINORBITS) | (minor & MINORMASK))
}

/// Decode the octal escapes mountinfo uses for spaces and friends
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + (b - b'0') as u32);
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Parse the NFS mounts of a mountinfo table
///
/// Line format (proc(5)):
/// `id parent major:minor root mount_point options [optional...] - fstype source super_options`
pub fn parse_mountinfo(text: &str) -> HashMap<u32, String> {
    let mut mounts = HashMap::new();

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(sep) = fields.iter().position(|f| *f == "-") else {
            continue;
        };
        if fields.len() < 5 || sep + 1 >= fields.len() {
            continue;
        }

        let fstype = fields[sep + 1];
        if !fstype.starts_with("nfs") {
            continue;
        }

        if let Some(dev) = parse_devt(fields[2]) {
            mounts.insert(dev, unescape(fields[4]));
        }
    }

    mounts
}

/// Default time before a missing device triggers another table read
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Device number to NFS mount point map
pub struct MountsMap {
    path: PathBuf,
    mounts: HashMap<u32, String>,
    missing: HashSet<u32>,
    last_refresh: Instant,
    refresh_interval: Duration,
}

impl Default for MountsMap {
    fn default() -> Self {
        Self::new()
    }
}

impl MountsMap {
    /// Map backed by the current process's mount table
    pub fn new() -> Self {
        Self::with_path(PathBuf::from(MOUNTINFO_PATH))
    }

    /// Map backed by an arbitrary mountinfo file
    pub fn with_path(path: PathBuf) -> Self {
        let mut map = Self {
            path,
            mounts: HashMap::new(),
            missing: HashSet::new(),
            last_refresh: Instant::now(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        };
        if let Err(e) = map.refresh() {
            warn!("Failed to load mount table: {:#}", e);
        }
        map
    }

    /// Set the minimum time between reads caused by known-missing devices
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Re-read the mount table
    pub fn refresh(&mut self) -> Result<()> {
        self.last_refresh = Instant::now();
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read mount table: {:?}", self.path))?;
        self.mounts = parse_mountinfo(&text);
        debug!("Loaded {} NFS mounts from {:?}", self.mounts.len(), self.path);
        Ok(())
    }

    /// Mount point of a device
    ///
    /// A device seen for the first time triggers a table read on a miss.
    /// Devices already known to be missing only do so once the refresh
    /// interval has passed.
    pub fn resolve(&mut self, dev: u32) -> Option<String> {
        if let Some(mount) = self.mounts.get(&dev) {
            return Some(mount.clone());
        }

        if self.missing.contains(&dev) && self.last_refresh.elapsed() < self.refresh_interval {
            return None;
        }

        if let Err(e) = self.refresh() {
            warn!("{:#}", e);
        }

        match self.mounts.get(&dev) {
            Some(mount) => {
                self.missing.remove(&dev);
                Some(mount.clone())
            }
            None => {
                if self.missing.insert(dev) {
                    warn!("No NFS mount found for device {}", devt_to_str(dev));
                }
                None
            }
        }
    }

    /// Number of known NFS mounts
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    /// Whether no NFS mount is known
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}
