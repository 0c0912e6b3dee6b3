//! File-backed probes and the parsers for cgroup accounting files
//!
//! Formats handled:
//! - single integer files (`cpuacct.usage`, `memory.current`, ...)
//! - `cpu.stat` key/value pairs, where `usage_usec` carries CPU time
//! - `cpu.max` as `"<quota> <period>"` or `"max <period>"`
//! - `cpu.cfs_quota_us` / `cpu.cfs_period_us` pairs, `-1` meaning no quota
//! - memory limits as an integer or `max`

use super::{async_trait, Probe};
use crate::error::MeterError;
use crate::models::{Entitlement, MemoryLimit};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error};

/// cgroup v1 reports "no limit" as PAGE_COUNTER_MAX rounded to a page
const V1_UNLIMITED_THRESHOLD: u64 = 0x7FFF_FFFF_FFFF_F000;

/// Read a whole accounting file
///
/// A missing file means the interface does not exist here and is only
/// logged at debug. Any other failure is logged at error.
async fn read_accounting_file(path: &Path) -> Option<String> {
    match fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Accounting file not present");
            None
        }
        Err(e) => {
            let err = MeterError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            };
            error!(error = %err, "Accounting file unreadable, trying next source");
            None
        }
    }
}

fn report_parse_failure(path: &Path, reason: String) {
    let err = MeterError::ParseFailed {
        path: path.to_path_buf(),
        reason,
    };
    error!(error = %err, "Accounting file malformed, trying next source");
}

/// Probe over a single file with a parser for its content
pub struct FileProbe<T> {
    path: PathBuf,
    parse: fn(&str) -> Result<T, String>,
}

impl<T> FileProbe<T> {
    pub fn new(path: impl Into<PathBuf>, parse: fn(&str) -> Result<T, String>) -> Self {
        Self {
            path: path.into(),
            parse,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<T: Send + 'static> Probe for FileProbe<T> {
    type Value = T;

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn try_read(&self) -> Option<T> {
        let content = read_accounting_file(&self.path).await?;
        match (self.parse)(&content) {
            Ok(value) => Some(value),
            Err(reason) => {
                report_parse_failure(&self.path, reason);
                None
            }
        }
    }
}

/// cgroup v2 `cpu.max` probe
pub type CpuMaxProbe = FileProbe<Entitlement>;

impl CpuMaxProbe {
    pub fn cpu_max(path: impl Into<PathBuf>) -> Self {
        FileProbe::new(path, parse_cpu_max)
    }
}

/// cgroup v1 CFS quota probe over the `cpu.cfs_quota_us` / `cpu.cfs_period_us` pair
pub struct CfsQuotaProbe {
    quota_path: PathBuf,
    period_path: PathBuf,
}

impl CfsQuotaProbe {
    pub fn new(quota_path: impl Into<PathBuf>, period_path: impl Into<PathBuf>) -> Self {
        Self {
            quota_path: quota_path.into(),
            period_path: period_path.into(),
        }
    }

    /// Probe under a v1 `cpu` controller directory
    pub fn in_dir(cpu_dir: &Path) -> Self {
        Self::new(
            cpu_dir.join("cpu.cfs_quota_us"),
            cpu_dir.join("cpu.cfs_period_us"),
        )
    }
}

#[async_trait]
impl Probe for CfsQuotaProbe {
    type Value = Entitlement;

    fn describe(&self) -> String {
        format!(
            "{} + {}",
            self.quota_path.display(),
            self.period_path.display()
        )
    }

    async fn try_read(&self) -> Option<Entitlement> {
        let quota_content = read_accounting_file(&self.quota_path).await?;
        let quota = match parse_quota(&quota_content) {
            Ok(Some(quota)) if quota > 0 => quota,
            Ok(_) => return Some(Entitlement::UNCONSTRAINED),
            Err(reason) => {
                report_parse_failure(&self.quota_path, reason);
                return None;
            }
        };

        let period_content = read_accounting_file(&self.period_path).await?;
        match parse_u64(&period_content) {
            Ok(period) if period > 0 => Some(Entitlement::from_quota(quota, period)),
            Ok(_) => {
                report_parse_failure(&self.period_path, "period must be positive".into());
                None
            }
            Err(reason) => {
                report_parse_failure(&self.period_path, reason);
                None
            }
        }
    }
}

/// Parse a file holding a single unsigned integer
pub fn parse_u64(content: &str) -> Result<u64, String> {
    let trimmed = content.trim();
    trimmed
        .parse()
        .map_err(|e| format!("expected an unsigned integer, got '{}': {}", trimmed, e))
}

/// Parse a v1 quota value
///
/// Returns `None` for "no quota" (`-1`, `max` or `unlimited`).
pub fn parse_quota(content: &str) -> Result<Option<i64>, String> {
    let trimmed = content.trim();
    if trimmed == "max" || trimmed == "unlimited" {
        return Ok(None);
    }
    let quota: i64 = trimmed
        .parse()
        .map_err(|e| format!("expected a quota, got '{}': {}", trimmed, e))?;
    Ok(if quota < 0 { None } else { Some(quota) })
}

/// Parse `cpu.max`
pub fn parse_cpu_max(content: &str) -> Result<Entitlement, String> {
    let mut tokens = content.split_whitespace();
    let quota = tokens.next().ok_or("cpu.max is empty")?;
    if quota == "max" {
        return Ok(Entitlement::UNCONSTRAINED);
    }

    let quota: i64 = quota
        .parse()
        .map_err(|e| format!("invalid quota '{}': {}", quota, e))?;
    let period = tokens.next().ok_or("cpu.max has no period")?;
    let period: u64 = period
        .parse()
        .map_err(|e| format!("invalid period '{}': {}", period, e))?;

    if quota > 0 && period == 0 {
        return Err("period must be positive".into());
    }
    Ok(Entitlement::from_quota(quota, period))
}

/// Parse the cumulative CPU time out of `cpu.stat`, in nanoseconds
pub fn parse_cpu_stat_usage(content: &str) -> Result<u64, String> {
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 && parts[0] == "usage_usec" {
            let usec: u64 = parts[1]
                .parse()
                .map_err(|e| format!("invalid usage_usec '{}': {}", parts[1], e))?;
            return Ok(usec.saturating_mul(1_000));
        }
    }
    Err("no usage_usec entry".into())
}

/// Parse a memory limit file (`memory.max` or `memory.limit_in_bytes`)
pub fn parse_memory_limit(content: &str) -> Result<MemoryLimit, String> {
    let trimmed = content.trim();
    if trimmed == "max" {
        return Ok(MemoryLimit::Unbounded);
    }
    let bytes = parse_u64(trimmed)?;
    if bytes >= V1_UNLIMITED_THRESHOLD {
        return Ok(MemoryLimit::Unbounded);
    }
    Ok(MemoryLimit::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("104857600\n"), Ok(104857600));
        assert!(parse_u64("").is_err());
        assert!(parse_u64("-5").is_err());
    }

    #[test]
    fn test_parse_quota() {
        assert_eq!(parse_quota("25000\n"), Ok(Some(25000)));
        assert_eq!(parse_quota("-1\n"), Ok(None));
        assert_eq!(parse_quota("unlimited"), Ok(None));
        assert_eq!(parse_quota("0"), Ok(Some(0)));
        assert!(parse_quota("lots").is_err());
    }

    #[test]
    fn test_parse_cpu_max() {
        assert_eq!(parse_cpu_max("25000 100000\n").unwrap().cores(), 0.25);
        assert_eq!(
            parse_cpu_max("max 100000\n").unwrap(),
            Entitlement::UNCONSTRAINED
        );
        assert_eq!(
            parse_cpu_max("0 100000").unwrap(),
            Entitlement::UNCONSTRAINED
        );
        assert!(parse_cpu_max("").is_err());
        assert!(parse_cpu_max("25000").is_err());
        assert!(parse_cpu_max("25000 0").is_err());
    }

    #[test]
    fn test_parse_cpu_stat_usage() {
        let content = r#"usage_usec 123456789
user_usec 100000000
system_usec 23456789
nr_periods 1000
nr_throttled 50
throttled_usec 5000000"#;

        assert_eq!(parse_cpu_stat_usage(content), Ok(123_456_789_000));
        assert!(parse_cpu_stat_usage("nr_periods 10").is_err());
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("max\n"), Ok(MemoryLimit::Unbounded));
        assert_eq!(
            parse_memory_limit("1073741824\n"),
            Ok(MemoryLimit::Bounded(1_073_741_824))
        );
        assert_eq!(
            parse_memory_limit("9223372036854771712"),
            Ok(MemoryLimit::Unbounded)
        );
        assert!(parse_memory_limit("plenty").is_err());
    }
}
