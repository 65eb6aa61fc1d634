//! NFS operation statistics reader
//!
//! Replays recorded probe events into the engine, drains its summary
//! table periodically and exports enriched samples.

pub mod collector;
pub mod config;
pub mod envs;
pub mod events;
pub mod exporter;
pub mod mounts;
pub mod source;
pub mod types;

pub use collector::{AnonField, CollectorOptions, StatsCollector, TagFilter};
pub use config::Config;
pub use events::{dispatch, EventProcessor, Probe, ReplayStats};
pub use exporter::{ExporterType, JsonExporter, MetricsExporter, ScreenExporter};
pub use mounts::MountsMap;
pub use envs::PidEnvMap;
pub use source::TraceSource;
pub use types::*;
