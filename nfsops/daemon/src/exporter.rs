//! Sample exporters
//!
//! Provides the JSON file exporter and the screen (log) exporter.

use crate::types::{Sample, StatRow};
use anyhow::{bail, Context, Result};
use log::info;
use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    str::FromStr,
};

/// Trait for sample exporters
pub trait MetricsExporter {
    /// Export one collection sample
    ///
    /// # Arguments
    ///
    /// * `sample` - Collected statistics to export
    ///
    /// # Returns
    ///
    /// Result indicating success or failure
    fn export(&self, sample: &Sample) -> Result<()>;
}

/// Export format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterType {
    /// JSON documents appended to a file
    Json,
    /// Table rendered to the log
    Screen,
}

impl FromStr for ExporterType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExporterType::Json),
            "screen" | "stdout" => Ok(ExporterType::Screen),
            _ => bail!("Unsupported format: {}. Use json or screen", s),
        }
    }
}

/// JSON exporter
pub struct JsonExporter {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, sample: &Sample) -> Result<()> {
        let mut json = if self.pretty {
            serde_json::to_string_pretty(sample)?
        } else {
            serde_json::to_string(sample)?
        };
        json.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .with_context(|| format!("Failed to open output file: {:?}", self.output_path))?;

        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write to output file: {:?}", self.output_path))?;

        Ok(())
    }
}

/// Screen exporter
#[derive(Debug, Default)]
pub struct ScreenExporter;

impl ScreenExporter {
    /// Create a new screen exporter
    pub fn new() -> Self {
        Self
    }

    fn row_header(row: &StatRow) -> String {
        let mut header = format!(
            "{} pid={} uid={} comm={} mount={}",
            row.hostname, row.pid, row.uid, row.comm, row.mount
        );
        for (name, value) in &row.tags {
            header.push_str(&format!(" {}={}", name, value));
        }
        header
    }

    /// Render a sample as a text table
    ///
    /// Only operations that happened during the interval are listed.
    fn to_screen_format(sample: &Sample) -> String {
        let mut output = String::new();

        output.push_str(&format!("######## SAMPLE: {} ########\n", sample.timestamp));

        for row in &sample.rows {
            output.push_str(&Self::row_header(row));
            output.push('\n');

            output.push_str(&format!(
                "    {:<14} {:>10} {:>8} {:>14}\n",
                "op", "count", "errors", "duration(s)"
            ));
            for (name, op) in row.ops.iter().filter(|(_, op)| op.count > 0) {
                output.push_str(&format!(
                    "    {:<14} {:>10} {:>8} {:>14.6}\n",
                    name, op.count, op.errors, op.duration
                ));
            }

            if row.read_bytes > 0 || row.write_bytes > 0 {
                output.push_str(&format!(
                    "    read_bytes={} write_bytes={}\n",
                    row.read_bytes, row.write_bytes
                ));
            }
        }

        if sample.rows.is_empty() {
            output.push_str("(no NFS activity)\n");
        }

        output
    }
}

impl MetricsExporter for ScreenExporter {
    fn export(&self, sample: &Sample) -> Result<()> {
        for line in Self::to_screen_format(sample).lines() {
            info!("{}", line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OpReport;
    use std::collections::BTreeMap;

    fn create_test_sample() -> Sample {
        let mut ops = BTreeMap::new();
        ops.insert(
            "read".to_string(),
            OpReport {
                count: 3,
                errors: 1,
                duration: 0.5,
            },
        );
        ops.insert("write".to_string(), OpReport::default());

        let mut tags = BTreeMap::new();
        tags.insert("JOB".to_string(), "42".to_string());

        Sample {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            interval_secs: 5,
            rows: vec![StatRow {
                timestamp: "2025-01-01T00:00:00Z".to_string(),
                hostname: "node1".to_string(),
                pid: 10,
                uid: 1000,
                comm: "cp".to_string(),
                mount: "/mnt/data".to_string(),
                tags,
                ops,
                read_bytes: 8192,
                write_bytes: 0,
            }],
            engine: BTreeMap::new(),
        }
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<ExporterType>().unwrap(), ExporterType::Json);
        assert_eq!("screen".parse::<ExporterType>().unwrap(), ExporterType::Screen);
        assert!("prometheus".parse::<ExporterType>().is_err());
    }

    #[test]
    fn test_screen_format() {
        let screen = ScreenExporter::to_screen_format(&create_test_sample());

        assert!(screen.starts_with("######## SAMPLE: 2025-01-01T00:00:00Z ########"));
        assert!(screen.contains("comm=cp mount=/mnt/data JOB=42"));
        assert!(screen.contains("read"));
        assert!(!screen.contains("write "));
        assert!(screen.contains("read_bytes=8192"));
    }

    #[test]
    fn test_screen_format_empty_sample() {
        let mut sample = create_test_sample();
        sample.rows.clear();
        assert!(ScreenExporter::to_screen_format(&sample).contains("no NFS activity"));
    }

    #[test]
    fn test_json_exporter_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let exporter = JsonExporter::new(path.clone(), false);
        let sample = create_test_sample();

        exporter.export(&sample).unwrap();
        exporter.export(&sample).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: Sample = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, sample);
    }

    #[test]
    fn test_json_exporter_bad_path() {
        let exporter = JsonExporter::new(PathBuf::from("/nonexistent/dir/stats.json"), true);
        let err = exporter.export(&create_test_sample()).unwrap_err();
        assert!(err.to_string().contains("Failed to open output file"));
    }
}
