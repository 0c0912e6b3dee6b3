//! Cumulative counter reading
//!
//! Candidate sources, in priority order:
//! - CPU time: `cpu,cpuacct/cpuacct.usage`, `cpuacct/cpuacct.usage` (ns),
//!   then `cpu.stat` `usage_usec`
//! - memory used: `memory/memory.usage_in_bytes`, then `memory.current`
//! - memory limit: `memory/memory.limit_in_bytes`, `memory/memory.max`,
//!   then `memory.max`

use super::{
    first_available, first_available_indexed, parse_cpu_stat_usage, parse_memory_limit, parse_u64,
    FileProbe, Probe,
};
use crate::models::{CounterSnapshot, MemoryLimit};
use std::path::PathBuf;
use tokio::time::Instant;

type ProbeList<T> = Vec<Box<dyn Probe<Value = T>>>;

/// Reads point-in-time counters from the first source that works
pub struct CounterReader {
    cpu_time: ProbeList<u64>,
    memory_used: ProbeList<u64>,
    memory_limit: ProbeList<MemoryLimit>,
}

impl CounterReader {
    /// Reader over the standard cgroup v1 and v2 layouts under `cgroup_root`
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = cgroup_root.into();

        Self {
            cpu_time: vec![
                Box::new(FileProbe::new(
                    root.join("cpu,cpuacct").join("cpuacct.usage"),
                    parse_u64,
                )),
                Box::new(FileProbe::new(
                    root.join("cpuacct").join("cpuacct.usage"),
                    parse_u64,
                )),
                Box::new(FileProbe::new(root.join("cpu.stat"), parse_cpu_stat_usage)),
            ],
            memory_used: vec![
                Box::new(FileProbe::new(
                    root.join("memory").join("memory.usage_in_bytes"),
                    parse_u64,
                )),
                Box::new(FileProbe::new(root.join("memory.current"), parse_u64)),
            ],
            memory_limit: vec![
                Box::new(FileProbe::new(
                    root.join("memory").join("memory.limit_in_bytes"),
                    parse_memory_limit,
                )),
                Box::new(FileProbe::new(
                    root.join("memory").join("memory.max"),
                    parse_memory_limit,
                )),
                Box::new(FileProbe::new(root.join("memory.max"), parse_memory_limit)),
            ],
        }
    }

    /// Reader over explicit probe lists
    pub fn with_probes(
        cpu_time: ProbeList<u64>,
        memory_used: ProbeList<u64>,
        memory_limit: ProbeList<MemoryLimit>,
    ) -> Self {
        Self {
            cpu_time,
            memory_used,
            memory_limit,
        }
    }

    /// Cumulative CPU time in nanoseconds, with the index of the source that produced it
    ///
    /// Candidates differ in scope, so readings are only comparable when they
    /// come from the same index.
    pub async fn read_cpu_time(&self) -> Option<(usize, u64)> {
        first_available_indexed(&self.cpu_time).await
    }

    /// Resident memory in bytes, 0 if no source is available
    pub async fn read_memory_used(&self) -> u64 {
        first_available(&self.memory_used).await.unwrap_or(0)
    }

    /// Memory ceiling, unbounded if no source is available
    pub async fn read_memory_limit(&self) -> MemoryLimit {
        first_available(&self.memory_limit)
            .await
            .unwrap_or(MemoryLimit::Unbounded)
    }

    /// Take one snapshot of every counter
    pub async fn snapshot(&self) -> CounterSnapshot {
        let cpu_time = self.read_cpu_time().await;
        let taken_at = Instant::now();
        let memory_used_bytes = self.read_memory_used().await;
        let memory_limit = self.read_memory_limit().await;

        CounterSnapshot {
            cpu_time_nanos: cpu_time.map_or(0, |(_, nanos)| nanos),
            cpu_source: cpu_time.map(|(index, _)| index),
            memory_used_bytes,
            memory_limit,
            taken_at,
        }
    }
}
