//! NFS Operation Stats - Reader Program
//!
//! Replays recorded NFS client probe events into the correlation engine,
//! collects per-process statistics at a fixed interval and exports them.
//!
//! ## Usage
//!
//! ```bash
//! # Replay a trace, print a table every 5 seconds
//! ./nfsops --trace events.jsonl
//!
//! # Stream from the probe collector, append JSON samples
//! probe-collector | ./nfsops --format json --output stats.json
//!
//! # Tag rows with job variables, keep only tagged processes
//! ./nfsops --envs SLURM_JOB_ID,PBS_JOBID --tag-filter any
//!
//! # Use a config file (its keys override the command line)
//! ./nfsops -C nfsops.json
//! ```

use anyhow::Result;
use clap::Parser;
use log::info;
use nfsops_daemon::{
    collector::StatsCollector,
    config::Config,
    envs::PidEnvMap,
    events::{EventProcessor, ReplayStats},
    exporter::{ExporterType, JsonExporter, MetricsExporter, ScreenExporter},
    mounts::MountsMap,
    source::TraceSource,
    types::{nstosec, OpCounts, OpKind},
};
use nfsops_common::constants::{MAX_IDENTITIES, MAX_IN_FLIGHT, MAX_LAUNCH_EVENTS};
use nfsops_engine::{EngineStats, Tracker};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    signal,
    time::{interval, sleep, Instant, MissedTickBehavior},
};

/// Per-process NFS client operation statistics
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Collection interval in seconds
    #[clap(short, long, default_value_t = 5)]
    interval: u64,

    /// Duration to run (in seconds, 0 = until the trace ends)
    #[clap(short, long, default_value_t = 0)]
    duration: u64,

    /// Trace of recorded probe events, "-" for stdin
    #[clap(short, long, default_value = "-")]
    trace: String,

    /// Output file for JSON samples
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Output format (json, screen)
    #[clap(short, long, default_value = "screen")]
    format: String,

    /// Pretty-print JSON samples
    #[clap(long)]
    pretty: bool,

    /// Accounting mode (correlated, count)
    #[clap(short, long, default_value = "correlated")]
    mode: String,

    /// Merge the processes of one command
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    squash_pid: bool,

    /// Environment variable prefixes to tag rows with (comma separated)
    #[clap(long, value_delimiter = ',')]
    envs: Vec<String>,

    /// Keep rows carrying any or all of the tracked variables
    #[clap(long)]
    tag_filter: Option<String>,

    /// Fields to anonymize (COMM, MOUNT, PID, UID, TAGS)
    #[clap(long, value_delimiter = ',')]
    anon_fields: Vec<String>,

    /// Seconds between environment map vacuums
    #[clap(long, default_value_t = 600)]
    vacuum: u64,

    /// Event dispatch workers
    #[clap(short, long, default_value_t = 4)]
    workers: usize,

    /// Maximum number of pending operations
    #[clap(long, default_value_t = MAX_IN_FLIGHT as usize)]
    in_flight_capacity: usize,

    /// Maximum number of tracked identities
    #[clap(long, default_value_t = MAX_IDENTITIES as usize)]
    summary_capacity: usize,

    /// Maximum number of pending launch notifications
    #[clap(long, default_value_t = MAX_LAUNCH_EVENTS as usize)]
    launch_capacity: usize,

    /// Do not split statistics by volume
    #[clap(long)]
    no_volume: bool,

    /// Keep identities between collections instead of draining them
    #[clap(long)]
    no_drain: bool,

    /// Progress reporting interval in seconds
    #[clap(long, default_value_t = 10)]
    progress_interval: u64,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// JSON config file, its keys override the command line
    #[clap(short = 'C', long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let config_path = self.config.clone();
        let config = Config {
            interval: self.interval,
            duration: self.duration,
            trace: self.trace,
            output: self.output,
            format: self.format,
            pretty: self.pretty,
            mode: self.mode,
            squash_pid: self.squash_pid,
            envs: self.envs,
            tag_filter: self.tag_filter,
            anon_fields: self.anon_fields,
            vacuum: self.vacuum,
            workers: self.workers,
            in_flight_capacity: self.in_flight_capacity,
            summary_capacity: self.summary_capacity,
            launch_capacity: self.launch_capacity,
            no_volume: self.no_volume,
            no_drain: self.no_drain,
            progress_interval: self.progress_interval,
            verbose: self.verbose,
        };

        match config_path {
            Some(path) => config.merge_file(&path),
            None => Ok(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if config.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    print_banner();

    config.validate()?;

    info!("Starting NFS operation stats...");
    info!("   Interval: {} seconds", config.interval);
    info!(
        "   Duration: {}",
        if config.duration == 0 {
            "until end of trace".to_string()
        } else {
            format!("{} seconds", config.duration)
        }
    );
    info!("   Trace: {}", config.trace);
    info!("   Format: {}", config.format);
    info!("   Mode: {}", config.mode);
    if !config.envs.is_empty() {
        info!("   Tracked variables: {}", config.envs.join(","));
    }

    // Engine shared by the workers and the collector
    let tracker = Arc::new(Tracker::new(config.tracker_config()?));

    let mut collector = StatsCollector::new(
        Arc::clone(&tracker),
        config.collector_options()?,
        MountsMap::new(),
        PidEnvMap::new(config.envs.clone(), config.vacuum_interval()),
    );

    let exporter: Box<dyn MetricsExporter> = match config.exporter_type()? {
        ExporterType::Json => {
            let output = config.output.clone().unwrap_or_default();
            info!("   Output: {:?}", output);
            Box::new(JsonExporter::new(output, config.pretty))
        }
        ExporterType::Screen => Box::new(ScreenExporter::new()),
    };

    let source = TraceSource::open(&config.trace).await?;

    // Create event processor
    let processor = EventProcessor::new(Arc::clone(&tracker), config.workers);

    // Spawn progress reporter
    let progress = processor.spawn_progress_reporter(config.progress_interval);

    let start_time = Instant::now();
    let replay = processor.replay(source);
    tokio::pin!(replay);

    let deadline = async {
        if config.duration > 0 {
            sleep(Duration::from_secs(config.duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(deadline);

    let mut ticker = interval(Duration::from_secs(config.interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    info!("Collecting statistics...");

    let mut replay_stats = None;
    loop {
        tokio::select! {
            result = &mut replay => {
                replay_stats = Some(result?);
                info!("End of trace reached, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                let sample = collector.collect(config.interval);
                exporter.export(&sample)?;
            }
            _ = &mut deadline => {
                info!("Duration reached, shutting down...");
                break;
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down...");
                break;
            }
        }
    }

    progress.abort();

    // Flush what the last interval accumulated
    let sample = collector.collect(config.interval);
    exporter.export(&sample)?;

    print_summary(
        collector.totals(),
        tracker.stats(),
        replay_stats,
        start_time.elapsed().as_secs(),
    );

    Ok(())
}

fn print_banner() {
    println!(
        r#"
╔═══════════════════════════════════════════════════╗
║          NFS Client Operation Statistics          ║
║         per-process latency and error counts      ║
╚═══════════════════════════════════════════════════╝
    "#
    );
}

fn print_summary(
    totals: &OpCounts,
    engine: &EngineStats,
    replay: Option<ReplayStats>,
    elapsed_secs: u64,
) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Total operations:   {}", totals.total_count());
    info!("  Total errors:       {}", totals.total_errors());
    info!("  Read bytes:         {}", totals.rbytes);
    info!("  Write bytes:        {}", totals.wbytes);
    info!("  Duration:           {} seconds", elapsed_secs);
    if let Some(replay) = replay {
        info!("  Events dispatched:  {}", replay.dispatched);
        info!("  Events rejected:    {}", replay.rejected);
        info!("  Malformed lines:    {}", replay.malformed);
    }
    info!("");
    info!("  Operations:");
    for op in OpKind::ALL.iter() {
        let stat = totals.get(*op);
        if stat.count == 0 {
            continue;
        }
        info!(
            "    {:<14} {:>10} errors {:>8} time {:>12.6}s",
            op.name(),
            stat.count,
            stat.errors,
            nstosec(stat.duration_ns)
        );
    }
    info!("");
    info!("  Engine Health:");
    for (name, value) in engine.snapshot() {
        info!("    {:<20} {:>10}", name, value);
    }
    info!("");
    info!("============================================");
}
