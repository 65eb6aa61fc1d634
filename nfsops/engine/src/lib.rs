//! NFS client operation statistics engine
//!
//! Correlates the entry and exit of traced NFS client functions and folds
//! each completed operation into per-identity counters.
//!
//! ## Architecture
//!
//! ```text
//! entry handler -> filter -> IN_FLIGHT[tid, op] = {target, start, bytes}
//!                  |
//!                  v
//! exit handler  -> take IN_FLIGHT[tid, op] -> SUMMARY[identity].fold()
//!                  |
//!                  v
//! reader        -> drain SUMMARY, drain LAUNCHES, export
//! ```
//!
//! Handlers never fail. Filtered events, unmatched exits and full tables
//! turn into no-ops counted in [`EngineStats`].

pub mod filter;
pub mod handlers;
pub mod helpers;
pub mod launch;
pub mod maps;
pub mod record;
pub mod stats;
pub mod tracker;

pub use helpers::ProbeContext;
pub use launch::LaunchQueue;
pub use maps::{BeginOp, BoundedMap, InFlightTable, SummaryTable};
pub use record::SummaryRecord;
pub use stats::EngineStats;
pub use tracker::{Skip, Target, Tracker, TrackerConfig, TrackerMode};
