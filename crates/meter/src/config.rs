//! Meter configuration

use anyhow::{Context, Result};
use meter_lib::accounting::DEFAULT_CGROUP_ROOT;
use meter_lib::runtime::DEFAULT_ENTITY_ID_VAR;
use meter_lib::sampler::{BackendChoice, SamplerConfig, SourceSettings};
use meter_lib::workload::WorkloadConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Meter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MeterConfig {
    /// Sampling backend: auto, cgroup or runtime
    #[serde(default)]
    pub backend: BackendChoice,

    /// Mount point of the cgroup filesystem
    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    /// Sampling interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound on one runtime stats fetch in milliseconds
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Docker-compatible runtime API endpoint
    #[serde(default = "default_runtime_endpoint")]
    pub runtime_endpoint: String,

    /// Environment variable holding the monitored container id
    #[serde(default = "default_entity_id_var")]
    pub entity_id_var: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_true")]
    pub workload_enabled: bool,

    #[serde(default = "default_workload_matrix_size")]
    pub workload_matrix_size: usize,

    #[serde(default = "default_workload_spawn_interval_ms")]
    pub workload_spawn_interval_ms: u64,

    #[serde(default = "default_workload_row_yield_ms")]
    pub workload_row_yield_ms: u64,

    #[serde(default = "default_workload_max_in_flight")]
    pub workload_max_in_flight: usize,
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from(DEFAULT_CGROUP_ROOT)
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_fetch_timeout_ms() -> u64 {
    5000
}

fn default_runtime_endpoint() -> String {
    std::env::var("DOCKER_HOST")
        .ok()
        .and_then(|host| endpoint_from_docker_host(&host))
        .unwrap_or_else(|| "http://localhost:2375".to_string())
}

/// Map a `DOCKER_HOST` value to an HTTP endpoint
///
/// Only TCP hosts are reachable over HTTP; unix sockets yield `None`.
fn endpoint_from_docker_host(host: &str) -> Option<String> {
    let host = host.trim();
    if let Some(address) = host.strip_prefix("tcp://") {
        return Some(format!("http://{}", address));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        return Some(host.to_string());
    }
    None
}

fn default_entity_id_var() -> String {
    DEFAULT_ENTITY_ID_VAR.to_string()
}

fn default_true() -> bool {
    true
}

fn default_workload_matrix_size() -> usize {
    1500
}

fn default_workload_spawn_interval_ms() -> u64 {
    100
}

fn default_workload_row_yield_ms() -> u64 {
    1
}

fn default_workload_max_in_flight() -> usize {
    16
}

impl MeterConfig {
    /// Load configuration from an optional file and `METER_*` environment variables
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("METER").try_parsing(true))
            .build()
            .context("Failed to load meter configuration")?;

        let meter_config: MeterConfig = config
            .try_deserialize()
            .context("Invalid meter configuration")?;
        meter_config.validate()?;
        Ok(meter_config)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            anyhow::bail!("interval_ms must be positive");
        }
        if self.fetch_timeout_ms == 0 {
            anyhow::bail!("fetch_timeout_ms must be positive");
        }
        if self.workload_enabled {
            if self.workload_spawn_interval_ms == 0 {
                anyhow::bail!("workload_spawn_interval_ms must be positive");
            }
            if self.workload_max_in_flight == 0 {
                anyhow::bail!("workload_max_in_flight must be positive");
            }
        }
        Ok(())
    }

    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            cgroup_root: self.cgroup_root.clone(),
            runtime_endpoint: self.runtime_endpoint.clone(),
            entity_id_var: self.entity_id_var.clone(),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::from_millis(self.interval_ms),
            ..SamplerConfig::default()
        }
    }

    pub fn workload_config(&self) -> WorkloadConfig {
        WorkloadConfig {
            matrix_size: self.workload_matrix_size,
            row_yield: Duration::from_millis(self.workload_row_yield_ms),
            spawn_interval: Duration::from_millis(self.workload_spawn_interval_ms),
            max_in_flight: self.workload_max_in_flight,
        }
    }
}
