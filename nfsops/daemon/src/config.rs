//! Reader configuration
//!
//! Settings come from the command line and optionally from a JSON
//! config file. Keys present in the file override the command line.

use crate::{
    collector::{AnonField, CollectorOptions, TagFilter},
    exporter::ExporterType,
};
use anyhow::{bail, Context, Result};
use nfsops_common::constants::{MAX_IDENTITIES, MAX_IN_FLIGHT, MAX_LAUNCH_EVENTS};
use nfsops_engine::{TrackerConfig, TrackerMode};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, path::Path, path::PathBuf, time::Duration};

/// Complete reader configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Collection interval in seconds
    pub interval: u64,
    /// Run time in seconds, 0 = until the trace ends
    pub duration: u64,
    /// Trace file, `-` for stdin
    pub trace: String,
    /// Output file of the JSON exporter
    pub output: Option<PathBuf>,
    /// Export format (json, screen)
    pub format: String,
    /// Pretty-print JSON samples
    pub pretty: bool,
    /// Accounting mode (correlated, count)
    pub mode: String,
    /// Merge the processes of one command
    pub squash_pid: bool,
    /// Environment variable prefixes to tag rows with
    pub envs: Vec<String>,
    /// Tag filter (any, all)
    pub tag_filter: Option<String>,
    /// Fields to anonymize
    pub anon_fields: Vec<String>,
    /// Seconds between environment map vacuums
    pub vacuum: u64,
    /// Event dispatch workers
    pub workers: usize,
    /// Maximum number of pending operations
    pub in_flight_capacity: usize,
    /// Maximum number of identities
    pub summary_capacity: usize,
    /// Maximum number of pending launch notifications
    pub launch_capacity: usize,
    /// Do not key identities by volume
    pub no_volume: bool,
    /// Snapshot instead of draining the summary table
    pub no_drain: bool,
    /// Progress reporting interval in seconds
    pub progress_interval: u64,
    /// Verbose logging
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: 5,
            duration: 0,
            trace: "-".to_string(),
            output: None,
            format: "screen".to_string(),
            pretty: false,
            mode: "correlated".to_string(),
            squash_pid: true,
            envs: Vec::new(),
            tag_filter: None,
            anon_fields: Vec::new(),
            vacuum: 600,
            workers: 4,
            in_flight_capacity: MAX_IN_FLIGHT as usize,
            summary_capacity: MAX_IDENTITIES as usize,
            launch_capacity: MAX_LAUNCH_EVENTS as usize,
            no_volume: false,
            no_drain: false,
            progress_interval: 10,
            verbose: false,
        }
    }
}

impl Config {
    /// Overlay a config file on this configuration
    ///
    /// Every key present in the file replaces the current value.
    pub fn merge_file(self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let overrides: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        let serde_json::Value::Object(overrides) = overrides else {
            bail!("Config file {:?} must hold a JSON object", path);
        };

        let mut merged = serde_json::to_value(&self)?;
        if let serde_json::Value::Object(fields) = &mut merged {
            fields.extend(overrides);
        }

        serde_json::from_value(merged)
            .with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Check the settings before anything starts
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            bail!("Interval must be >= 1");
        }
        if self.workers == 0 {
            bail!("Workers must be >= 1");
        }
        if self.tag_filter.is_some() && self.envs.is_empty() {
            bail!("A tag filter requires at least one environment variable (--envs)");
        }

        self.tag_filter()?;
        self.anon_fields()?;
        self.tracker_mode()?;
        if self.exporter_type()? == ExporterType::Json && self.output.is_none() {
            bail!("JSON format requires an output file (--output)");
        }

        Ok(())
    }

    /// Parsed accounting mode
    pub fn tracker_mode(&self) -> Result<TrackerMode> {
        match self.mode.to_lowercase().as_str() {
            "correlated" => Ok(TrackerMode::Correlated),
            "count" => Ok(TrackerMode::ImmediateCount),
            _ => bail!("Unsupported mode: {}. Use correlated or count", self.mode),
        }
    }

    /// Parsed export format
    pub fn exporter_type(&self) -> Result<ExporterType> {
        self.format.parse()
    }

    /// Parsed tag filter
    pub fn tag_filter(&self) -> Result<Option<TagFilter>> {
        self.tag_filter.as_deref().map(|s| s.parse()).transpose()
    }

    /// Parsed anonymized fields
    pub fn anon_fields(&self) -> Result<BTreeSet<AnonField>> {
        self.anon_fields.iter().map(|f| f.parse()).collect()
    }

    /// Engine configuration
    pub fn tracker_config(&self) -> Result<TrackerConfig> {
        Ok(TrackerConfig::new()
            .with_mode(self.tracker_mode()?)
            .with_in_flight_capacity(self.in_flight_capacity)
            .with_summary_capacity(self.summary_capacity)
            .with_launch_capacity(self.launch_capacity)
            .with_track_volume(!self.no_volume))
    }

    /// Collector configuration
    pub fn collector_options(&self) -> Result<CollectorOptions> {
        Ok(CollectorOptions {
            drain: !self.no_drain,
            squash_pid: self.squash_pid,
            envs: self.envs.clone(),
            tag_filter: self.tag_filter()?,
            anon_fields: self.anon_fields()?,
        })
    }

    /// Time between environment map vacuums
    pub fn vacuum_interval(&self) -> Duration {
        Duration::from_secs(self.vacuum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_file(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.tracker_mode().unwrap(), TrackerMode::Correlated);
        assert!(config.collector_options().unwrap().drain);
    }

    #[test]
    fn test_validation_failures() {
        let invalid = [
            Config {
                interval: 0,
                ..Config::default()
            },
            Config {
                workers: 0,
                ..Config::default()
            },
            Config {
                tag_filter: Some("any".to_string()),
                ..Config::default()
            },
            Config {
                anon_fields: vec!["HOSTNAME".to_string()],
                ..Config::default()
            },
            Config {
                mode: "sampled".to_string(),
                ..Config::default()
            },
            Config {
                format: "json".to_string(),
                ..Config::default()
            },
        ];

        for config in &invalid {
            assert!(config.validate().is_err(), "{:?} should be rejected", config);
        }
    }

    #[test]
    fn test_file_overrides_command_line() {
        let file = config_file(r#"{"interval": 30, "envs": ["JOB"], "tag-filter": "all"}"#);
        let cli = Config {
            interval: 2,
            workers: 8,
            ..Config::default()
        };

        let config = cli.merge_file(file.path()).unwrap();
        assert_eq!(config.interval, 30);
        assert_eq!(config.workers, 8);
        assert_eq!(config.tag_filter().unwrap(), Some(TagFilter::All));
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_key_rejected() {
        let file = config_file("[1, 2]");
        assert!(Config::default().merge_file(file.path()).is_err());

        let file = config_file(r#"{"intervall": 30}"#);
        assert!(Config::default().merge_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_keys_keep_defaults() {
        let file = config_file(r#"{"anon-fields": ["comm", " PID "], "no-volume": true}"#);
        let config = Config::default().merge_file(file.path()).unwrap();

        assert_eq!(config.interval, 5);
        let anon = config.anon_fields().unwrap();
        assert!(anon.contains(&AnonField::Comm));
        assert!(anon.contains(&AnonField::Pid));
        assert!(!config.tracker_config().unwrap().track_volume);
    }
}
