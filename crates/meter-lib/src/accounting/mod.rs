//! Resource accounting from cgroup filesystems
//!
//! Every accounting interface is wrapped in a [`Probe`]. Resolvers hold an
//! ordered list of probes and take the first one that yields a value, so
//! cgroup v1 and cgroup v2 layouts are handled by the same code path.

mod counters;
mod entitlement;
mod probe;


pub use counters::CounterReader;
pub use entitlement::EntitlementResolver;
pub use probe::{
    parse_cpu_max, parse_cpu_stat_usage, parse_memory_limit, parse_quota, parse_u64, CfsQuotaProbe,
    CpuMaxProbe, FileProbe,
};

use std::path::Path;
use tokio::fs;

pub use async_trait::async_trait;

/// Default cgroup mount point
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// One candidate source for a value
///
/// `try_read` never fails: a missing interface is `None`, and read or parse
/// failures are logged by the probe and also reported as `None`.
#[async_trait]
pub trait Probe: Send + Sync {
    type Value: Send;

    /// Human readable description, usually the file path
    fn describe(&self) -> String;

    async fn try_read(&self) -> Option<Self::Value>;
}

/// Try probes in order and return the first value produced
pub async fn first_available<T: Send>(probes: &[Box<dyn Probe<Value = T>>]) -> Option<T> {
    first_available_indexed(probes)
        .await
        .map(|(_, value)| value)
}

/// Like [`first_available`], also returning the position of the probe that answered
pub async fn first_available_indexed<T: Send>(
    probes: &[Box<dyn Probe<Value = T>>],
) -> Option<(usize, T)> {
    for (index, probe) in probes.iter().enumerate() {
        if let Some(value) = probe.try_read().await {
            tracing::trace!(source = %probe.describe(), "Probe produced a value");
            return Some((index, value));
        }
    }
    None
}

/// Cgroup version detected on the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
    Unknown,
}

/// Detect which cgroup hierarchy is mounted under `cgroup_root`
pub async fn detect_cgroup_version(cgroup_root: &Path) -> CgroupVersion {
    // Check for cgroup v2 unified hierarchy
    if fs::metadata(cgroup_root.join("cgroup.controllers")).await.is_ok() {
        return CgroupVersion::V2;
    }

    // Check for cgroup v1 controllers
    let v1_memory = cgroup_root.join("memory");
    let v1_cpuacct = cgroup_root.join("cpuacct");
    let v1_combined = cgroup_root.join("cpu,cpuacct");
    let has_cpuacct =
        fs::metadata(&v1_cpuacct).await.is_ok() || fs::metadata(&v1_combined).await.is_ok();
    if fs::metadata(&v1_memory).await.is_ok() && has_cpuacct {
        return CgroupVersion::V1;
    }

    CgroupVersion::Unknown
}
