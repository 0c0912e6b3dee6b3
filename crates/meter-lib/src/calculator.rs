//! Utilization arithmetic
//!
//! Turns pairs of cumulative counter readings into percentages. Two CPU
//! formulas exist because the sources disagree on what they measure:
//!
//! - cgroup counters: `raw% = (Δcpu_ns / 1e9) / elapsed_secs * 100`
//! - runtime stats: `raw% = (Δcontainer / Δsystem) * online_cpus * 100`
//!
//! Both are normalized the same way: `effective% = raw% / entitlement`.
//! Effective usage is not clamped, a unit bursting past its grant reports
//! more than 100%.

use crate::models::{
    CounterSnapshot, CpuUtilization, Entitlement, MemoryLimit, MemoryUtilization, BYTES_PER_MB,
};
use crate::runtime::ContainerStats;

const NANOS_PER_SEC: f64 = 1e9;

/// Scale a raw percentage by the entitlement
pub fn normalize(raw_percent: f64, entitlement: Entitlement) -> CpuUtilization {
    CpuUtilization {
        raw_percent,
        effective_percent: raw_percent / entitlement.cores(),
    }
}

/// CPU utilization between two cgroup counter readings
///
/// Returns zeros when there is no previous reading, when the two readings
/// did not come from the same CPU time source, when the interval is not
/// positive, or when the counter went backwards.
pub fn compute_cpu(
    previous: Option<&CounterSnapshot>,
    current: &CounterSnapshot,
    elapsed_secs: f64,
    entitlement: Entitlement,
) -> CpuUtilization {
    let Some(previous) = previous else {
        return CpuUtilization::default();
    };
    if current.cpu_source.is_none() || current.cpu_source != previous.cpu_source {
        return CpuUtilization::default();
    }
    let interval_valid = elapsed_secs.is_finite() && elapsed_secs > 0.0;
    if !interval_valid || current.cpu_time_nanos < previous.cpu_time_nanos {
        return CpuUtilization::default();
    }

    let cpu_secs_used = (current.cpu_time_nanos - previous.cpu_time_nanos) as f64 / NANOS_PER_SEC;
    let raw_fraction = cpu_secs_used / elapsed_secs;
    normalize(raw_fraction * 100.0, entitlement)
}

/// CPU utilization between two cgroup readings, timed by their own timestamps
pub fn compute_cpu_between(
    previous: Option<&CounterSnapshot>,
    current: &CounterSnapshot,
    entitlement: Entitlement,
) -> CpuUtilization {
    let elapsed = previous
        .and_then(|prev| current.seconds_since(prev))
        .unwrap_or(0.0);
    compute_cpu(previous, current, elapsed, entitlement)
}

/// Raw CPU percent from a runtime stats snapshot
///
/// The snapshot embeds its own previous reading in `precpu_stats`. A missing
/// or zero previous total means this is the first reading.
pub fn runtime_raw_cpu_percent(stats: &ContainerStats) -> f64 {
    let Some(previous) = stats.precpu_stats.as_ref() else {
        return 0.0;
    };
    let previous_total = previous.cpu_usage.total_usage;
    if previous_total == 0 {
        return 0.0;
    }

    let current = &stats.cpu_stats;
    let container_delta = current.cpu_usage.total_usage as f64 - previous_total as f64;
    let system_delta = current.system_cpu_usage.unwrap_or(0) as f64
        - previous.system_cpu_usage.unwrap_or(0) as f64;

    if system_delta > 0.0 && container_delta > 0.0 {
        (container_delta / system_delta) * current.online_cpus() as f64 * 100.0
    } else {
        0.0
    }
}

/// CPU utilization from a runtime stats snapshot
pub fn compute_runtime_cpu(stats: &ContainerStats, entitlement: Entitlement) -> CpuUtilization {
    normalize(runtime_raw_cpu_percent(stats), entitlement)
}

/// Memory utilization of one reading
///
/// The percentage is only defined against a real bound.
pub fn compute_memory(used_bytes: u64, limit: MemoryLimit) -> MemoryUtilization {
    let used_mb = used_bytes as f64 / BYTES_PER_MB;
    match limit {
        MemoryLimit::Bounded(limit_bytes) if limit_bytes > 0 => {
            let limit_mb = limit_bytes as f64 / BYTES_PER_MB;
            MemoryUtilization {
                used_mb,
                limit_mb: Some(limit_mb),
                usage_percent: Some(used_mb / limit_mb * 100.0),
            }
        }
        _ => MemoryUtilization {
            used_mb,
            limit_mb: None,
            usage_percent: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CpuStats, CpuUsage};
    use std::time::Duration;
    use tokio::time::Instant;

    fn snapshot(cpu_time_nanos: u64, taken_at: Instant) -> CounterSnapshot {
        CounterSnapshot {
            cpu_time_nanos,
            cpu_source: Some(0),
            memory_used_bytes: 0,
            memory_limit: MemoryLimit::Unbounded,
            taken_at,
        }
    }

    fn runtime_stats(
        total: u64,
        system: u64,
        pre_total: u64,
        pre_system: u64,
        online_cpus: Option<u32>,
    ) -> ContainerStats {
        ContainerStats {
            cpu_stats: CpuStats {
                cpu_usage: CpuUsage {
                    total_usage: total,
                    percpu_usage: None,
                },
                system_cpu_usage: Some(system),
                online_cpus,
            },
            precpu_stats: Some(CpuStats {
                cpu_usage: CpuUsage {
                    total_usage: pre_total,
                    percpu_usage: None,
                },
                system_cpu_usage: Some(pre_system),
                online_cpus,
            }),
            memory_stats: Default::default(),
        }
    }

    #[test]
    fn test_quarter_core_fully_used() {
        let start = Instant::now();
        let previous = snapshot(0, start);
        let current = snapshot(250_000_000, start + Duration::from_secs(1));

        let cpu = compute_cpu(Some(&previous), &current, 1.0, Entitlement::new(0.25));
        assert!((cpu.raw_percent - 25.0).abs() < 1e-9);
        assert!((cpu.effective_percent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_tick_is_zero() {
        let current = snapshot(250_000_000, Instant::now());

        let cpu = compute_cpu(None, &current, 1.0, Entitlement::new(0.25));
        assert_eq!(cpu.raw_percent, 0.0);
        assert_eq!(cpu.effective_percent, 0.0);
    }

    #[test]
    fn test_counter_regression_is_zero() {
        let start = Instant::now();
        let previous = snapshot(900, start);
        let current = snapshot(100, start + Duration::from_secs(1));

        let cpu = compute_cpu(Some(&previous), &current, 1.0, Entitlement::UNCONSTRAINED);
        assert_eq!(cpu, CpuUtilization::default());
    }

    #[test]
    fn test_readings_from_different_sources_are_zero() {
        let start = Instant::now();
        let previous = snapshot(0, start);
        let switched = CounterSnapshot {
            cpu_source: Some(2),
            ..snapshot(5_000_000_000, start + Duration::from_secs(1))
        };
        let unread = CounterSnapshot {
            cpu_source: None,
            ..snapshot(0, start + Duration::from_secs(1))
        };

        assert_eq!(
            compute_cpu(Some(&previous), &switched, 1.0, Entitlement::UNCONSTRAINED),
            CpuUtilization::default()
        );
        assert_eq!(
            compute_cpu(Some(&previous), &unread, 1.0, Entitlement::UNCONSTRAINED),
            CpuUtilization::default()
        );
    }

    #[test]
    fn test_non_positive_interval_is_zero() {
        let start = Instant::now();
        let previous = snapshot(0, start);
        let current = snapshot(1_000, start);

        assert_eq!(
            compute_cpu(Some(&previous), &current, 0.0, Entitlement::UNCONSTRAINED),
            CpuUtilization::default()
        );
        assert_eq!(
            compute_cpu_between(Some(&previous), &current, Entitlement::UNCONSTRAINED),
            CpuUtilization::default()
        );
    }

    #[test]
    fn test_effective_is_raw_over_entitlement() {
        let start = Instant::now();
        let previous = snapshot(1_000_000_000, start);
        let current = snapshot(1_700_000_000, start + Duration::from_secs(2));

        for cores in [0.1, 0.25, 1.0, 3.0] {
            let entitlement = Entitlement::new(cores);
            let cpu = compute_cpu(Some(&previous), &current, 2.0, entitlement);
            assert!(cpu.raw_percent >= 0.0);
            assert_eq!(cpu.effective_percent, cpu.raw_percent / cores);
        }
    }

    #[test]
    fn test_burst_above_grant_is_not_clamped() {
        let start = Instant::now();
        let previous = snapshot(0, start);
        let current = snapshot(500_000_000, start + Duration::from_secs(1));

        let cpu = compute_cpu(Some(&previous), &current, 1.0, Entitlement::new(0.25));
        assert!((cpu.effective_percent - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_cpu_between_uses_snapshot_times() {
        let start = Instant::now();
        let previous = snapshot(0, start);
        let current = snapshot(1_000_000_000, start + Duration::from_secs(4));

        let cpu = compute_cpu_between(Some(&previous), &current, Entitlement::UNCONSTRAINED);
        assert!((cpu.raw_percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_runtime_cpu_percent() {
        let stats = runtime_stats(12_000_000, 120_000_000, 10_000_000, 100_000_000, Some(2));

        let cpu = compute_runtime_cpu(&stats, Entitlement::UNCONSTRAINED);
        assert!((cpu.raw_percent - 20.0).abs() < 1e-9);
        assert!((cpu.effective_percent - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_runtime_cpu_first_reading() {
        let mut stats = runtime_stats(12_000_000, 120_000_000, 0, 0, Some(2));
        assert_eq!(runtime_raw_cpu_percent(&stats), 0.0);

        stats.precpu_stats = None;
        assert_eq!(runtime_raw_cpu_percent(&stats), 0.0);
    }

    #[test]
    fn test_runtime_cpu_needs_positive_deltas() {
        let idle = runtime_stats(10_000_000, 120_000_000, 10_000_000, 100_000_000, Some(2));
        assert_eq!(runtime_raw_cpu_percent(&idle), 0.0);

        let stalled_clock = runtime_stats(12_000_000, 100_000_000, 10_000_000, 100_000_000, Some(2));
        assert_eq!(runtime_raw_cpu_percent(&stalled_clock), 0.0);
    }

    #[test]
    fn test_runtime_cpu_counts_percpu_entries() {
        let mut stats = runtime_stats(12_000_000, 120_000_000, 10_000_000, 100_000_000, None);
        stats.cpu_stats.cpu_usage.percpu_usage = Some(vec![1, 2, 3, 4]);

        assert!((runtime_raw_cpu_percent(&stats) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_runtime_cpu_defaults_to_one_cpu() {
        let stats = runtime_stats(12_000_000, 120_000_000, 10_000_000, 100_000_000, None);

        assert!((runtime_raw_cpu_percent(&stats) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_memory_percent() {
        let memory = compute_memory(524_288_000, MemoryLimit::Bounded(1_073_741_824));
        assert!((memory.used_mb - 500.0).abs() < 1e-9);
        assert_eq!(memory.limit_mb, Some(1024.0));
        let percent = memory.usage_percent.unwrap();
        assert!((percent - 48.828125).abs() < 1e-9);
    }

    #[test]
    fn test_memory_percent_boundaries() {
        let full = compute_memory(1_048_576, MemoryLimit::Bounded(1_048_576));
        assert_eq!(full.usage_percent, Some(100.0));

        let empty = compute_memory(0, MemoryLimit::Bounded(1_048_576));
        assert_eq!(empty.usage_percent, Some(0.0));
    }

    #[test]
    fn test_memory_unbounded_has_no_percent() {
        let memory = compute_memory(1_048_576, MemoryLimit::Unbounded);
        assert_eq!(memory.used_mb, 1.0);
        assert_eq!(memory.limit_mb, None);
        assert_eq!(memory.usage_percent, None);
    }
}
