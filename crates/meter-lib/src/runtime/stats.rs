//! Container runtime stats snapshot
//!
//! Mirrors the subset of the Docker-compatible `/containers/{id}/stats`
//! payload the meter needs. The runtime embeds the previous CPU reading in
//! `precpu_stats`, so one snapshot is enough to compute a delta.

use crate::models::MemoryLimit;
use serde::{Deserialize, Serialize};

/// One stats snapshot for a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    /// Reading taken by the runtime at the previous sample
    #[serde(default)]
    pub precpu_stats: Option<CpuStats>,
    #[serde(default)]
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    /// Host-wide cumulative CPU time in nanoseconds
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    #[serde(default)]
    pub online_cpus: Option<u32>,
}

impl CpuStats {
    /// CPUs active at sample time
    ///
    /// Falls back to counting per-core entries, then to a single CPU.
    pub fn online_cpus(&self) -> u32 {
        if let Some(cpus) = self.online_cpus.filter(|&n| n > 0) {
            return cpus;
        }
        match self.cpu_usage.percpu_usage.as_ref().map(Vec::len) {
            Some(len) if len > 0 => len as u32,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    /// Cumulative CPU time of the container in nanoseconds
    #[serde(default)]
    pub total_usage: u64,
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl ContainerStats {
    pub fn memory_used_bytes(&self) -> u64 {
        self.memory_stats.usage.unwrap_or(0)
    }

    pub fn memory_limit(&self) -> MemoryLimit {
        self.memory_stats
            .limit
            .map(MemoryLimit::from_bytes)
            .unwrap_or(MemoryLimit::Unbounded)
    }
}

/// Stats payload as returned by the runtime
///
/// Some clients hand back a list of snapshots; the first one is used.
/// `Batch` is listed first so arrays never match the struct form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StatsPayload {
    Batch(Vec<ContainerStats>),
    Single(ContainerStats),
}

impl StatsPayload {
    pub fn into_first(self) -> Option<ContainerStats> {
        match self {
            StatsPayload::Single(stats) => Some(stats),
            StatsPayload::Batch(batch) => batch.into_iter().next(),
        }
    }
}
