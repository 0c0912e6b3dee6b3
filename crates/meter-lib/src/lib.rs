//! Usage meter library
//!
//! This crate provides the core functionality for:
//! - CPU entitlement resolution from cgroup quota files
//! - Cumulative counter reading from cgroup v1/v2 accounting files
//! - Runtime stats snapshots from a container runtime API
//! - CPU and memory utilization arithmetic
//! - The periodic sampling loop and a synthetic workload

pub mod accounting;
pub mod calculator;
pub mod error;
pub mod models;
pub mod observability;
pub mod runtime;
pub mod sampler;
pub mod workload;

pub use error::MeterError;
pub use models::*;
pub use observability::StructuredLogger;
