//! Recorded probe event source
//!
//! Reads one JSON encoded [`ProbeEvent`] per line from a file or stdin.
//! Malformed lines are logged and skipped.

use crate::types::ProbeEvent;
use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};

/// Line oriented probe event reader
pub struct TraceSource {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    line: String,
    line_no: u64,
    malformed: u64,
}

impl TraceSource {
    /// Open a trace file, `-` reads stdin
    pub async fn open(path: &str) -> Result<Self> {
        if path == "-" {
            info!("Reading probe events from stdin");
            return Ok(Self::from_reader(tokio::io::stdin()));
        }

        info!("Reading probe events from: {}", path);
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open trace file: {}", path))?;
        Ok(Self::from_reader(file))
    }

    /// Wrap any async reader
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(BufReader::new(reader)),
            line: String::new(),
            line_no: 0,
            malformed: 0,
        }
    }

    /// Next well-formed event, `None` at end of input
    pub async fn next_event(&mut self) -> Result<Option<ProbeEvent>> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .await
                .context("Failed to read trace")?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<ProbeEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => {
                    self.malformed += 1;
                    warn!("Skipping malformed trace line {}: {}", self.line_no, e);
                }
            }
        }
    }

    /// Number of lines read so far
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }

    /// Number of lines skipped as malformed
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}
