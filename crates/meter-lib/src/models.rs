//! Core data models for the usage meter

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Bytes per mebibyte, used for every MB figure the meter reports
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Fraction of one CPU core granted to the monitored execution unit
///
/// Always positive: non-positive or non-finite inputs collapse to
/// [`Entitlement::UNCONSTRAINED`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Entitlement(f64);

impl Entitlement {
    /// One full core, used whenever no quota applies
    pub const UNCONSTRAINED: Entitlement = Entitlement(1.0);

    pub fn new(cores: f64) -> Self {
        if cores.is_finite() && cores > 0.0 {
            Self(cores)
        } else {
            Self::UNCONSTRAINED
        }
    }

    /// Build from a CFS quota/period pair in microseconds
    pub fn from_quota(quota_us: i64, period_us: u64) -> Self {
        if quota_us <= 0 || period_us == 0 {
            return Self::UNCONSTRAINED;
        }
        Self::new(quota_us as f64 / period_us as f64)
    }

    pub fn cores(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Entitlement {
    type Error = String;

    fn try_from(cores: f64) -> Result<Self, Self::Error> {
        if cores.is_finite() && cores > 0.0 {
            Ok(Self(cores))
        } else {
            Err(format!(
                "entitlement must be a positive number of cores, got {}",
                cores
            ))
        }
    }
}

impl From<Entitlement> for f64 {
    fn from(entitlement: Entitlement) -> f64 {
        entitlement.0
    }
}

impl Default for Entitlement {
    fn default() -> Self {
        Self::UNCONSTRAINED
    }
}

impl fmt::Display for Entitlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Memory ceiling of the execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimit {
    Bounded(u64),
    Unbounded,
}

impl MemoryLimit {
    /// A zero byte limit carries no information, treat it as unbounded
    pub fn from_bytes(bytes: u64) -> Self {
        if bytes == 0 {
            MemoryLimit::Unbounded
        } else {
            MemoryLimit::Bounded(bytes)
        }
    }

    pub fn bytes(&self) -> Option<u64> {
        match self {
            MemoryLimit::Bounded(bytes) => Some(*bytes),
            MemoryLimit::Unbounded => None,
        }
    }
}

/// Which backend produced a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Cumulative counters read straight from cgroup accounting files
    Cgroup,
    /// Snapshot pairs fetched from a container runtime stats endpoint
    Runtime,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Cgroup => f.write_str("cgroup"),
            SourceKind::Runtime => f.write_str("runtime"),
        }
    }
}

/// One point-in-time reading of the cumulative counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSnapshot {
    /// Cumulative CPU time in nanoseconds, 0 when `cpu_source` is `None`
    pub cpu_time_nanos: u64,
    /// Which CPU time candidate produced `cpu_time_nanos`, `None` if none did
    pub cpu_source: Option<usize>,
    pub memory_used_bytes: u64,
    pub memory_limit: MemoryLimit,
    /// Monotonic time the snapshot was taken
    pub taken_at: Instant,
}

impl CounterSnapshot {
    /// Seconds elapsed since `earlier`, or `None` if the pair is not ordered
    pub fn seconds_since(&self, earlier: &CounterSnapshot) -> Option<f64> {
        let elapsed = self.taken_at.checked_duration_since(earlier.taken_at)?;
        if elapsed.is_zero() {
            return None;
        }
        Some(elapsed.as_secs_f64())
    }
}

/// CPU utilization derived from a pair of readings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CpuUtilization {
    /// Relative to one full core
    pub raw_percent: f64,
    /// Relative to the entitlement; 100 means the grant is fully used
    pub effective_percent: f64,
}

/// Memory utilization of a single reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryUtilization {
    pub used_mb: f64,
    /// `None` when the limit is unbounded
    pub limit_mb: Option<f64>,
    /// `None` when the limit is unbounded
    pub usage_percent: Option<f64>,
}

/// Fully computed result of one sampling tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub source: SourceKind,
    /// Wall-clock time of the tick, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Cumulative CPU counter behind this sample, when the source reports it
    pub cpu_usage_nanos: Option<u64>,
    pub raw_cpu_percent: f64,
    pub effective_cpu_percent: f64,
    pub memory_used_mb: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_percent: Option<f64>,
}

impl UtilizationSample {
    pub fn new(
        source: SourceKind,
        cpu_usage_nanos: Option<u64>,
        cpu: CpuUtilization,
        memory: MemoryUtilization,
    ) -> Self {
        Self {
            source,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            cpu_usage_nanos,
            raw_cpu_percent: cpu.raw_percent,
            effective_cpu_percent: cpu.effective_percent,
            memory_used_mb: memory.used_mb,
            memory_limit_mb: memory.limit_mb,
            memory_usage_percent: memory.usage_percent,
        }
    }
}
