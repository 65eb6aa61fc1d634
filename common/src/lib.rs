//! Shared types and utilities for the NFS operation tracker
//!
//! This crate provides the plain data structures shared between the
//! tracking engine and the userspace reader: table keys, in-flight
//! records, counter snapshots and the catalogue of traced operations.

#![cfg_attr(not(test), no_std)]

pub mod constants;
pub mod ops;
pub mod types;

// Re-export commonly used types
pub use ops::{ErrorConvention, OpKind, OP_KIND_COUNT};
pub use types::{
    Comm, ExecKey, InFlightKey, InFlightRecord, LaunchEvent, OpCounts, OpStatValues, StatsKey,
    TargetHandle, TargetMeta,
};
pub use constants::*;
