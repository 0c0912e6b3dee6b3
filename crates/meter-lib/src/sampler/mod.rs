//! Sample sources and the sampling loop
//!
//! A [`SampleSource`] turns one tick into one [`UtilizationSample`]. The
//! cgroup source keeps the previous counter reading itself; the runtime
//! source gets both halves of the delta from the runtime on every fetch.

mod r#loop;

pub use r#loop::{LoopExit, SamplerConfig, SamplingLoop, SamplingLoopBuilder};

use crate::accounting::{detect_cgroup_version, CgroupVersion, CounterReader};
use crate::calculator::{compute_cpu_between, compute_memory, compute_runtime_cpu};
use crate::error::{MeterError, Result};
use crate::models::{CounterSnapshot, Entitlement, SourceKind, UtilizationSample};
use crate::runtime::{entity_id_from_env, HttpStatsProvider, StatsProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

/// Produces one utilization sample per tick
#[async_trait]
pub trait SampleSource: Send {
    fn kind(&self) -> SourceKind;

    /// Called once before the first tick
    async fn prime(&mut self) -> Result<()> {
        Ok(())
    }

    async fn sample(&mut self) -> Result<UtilizationSample>;
}

/// Samples cgroup counters, keeping the previous reading between ticks
pub struct CgroupSampler {
    reader: CounterReader,
    entitlement: Entitlement,
    previous: Option<CounterSnapshot>,
}

impl CgroupSampler {
    pub fn new(reader: CounterReader, entitlement: Entitlement) -> Self {
        Self {
            reader,
            entitlement,
            previous: None,
        }
    }

    pub fn previous(&self) -> Option<&CounterSnapshot> {
        self.previous.as_ref()
    }
}

#[async_trait]
impl SampleSource for CgroupSampler {
    fn kind(&self) -> SourceKind {
        SourceKind::Cgroup
    }

    /// Take the baseline reading so the first tick has a delta
    async fn prime(&mut self) -> Result<()> {
        self.previous = Some(self.reader.snapshot().await);
        Ok(())
    }

    async fn sample(&mut self) -> Result<UtilizationSample> {
        let current = self.reader.snapshot().await;
        let cpu = compute_cpu_between(self.previous.as_ref(), &current, self.entitlement);
        let memory = compute_memory(current.memory_used_bytes, current.memory_limit);

        // An unread counter keeps the last good baseline
        if current.cpu_source.is_some() || self.previous.is_none() {
            self.previous = Some(current);
        }

        Ok(UtilizationSample::new(
            SourceKind::Cgroup,
            current.cpu_source.map(|_| current.cpu_time_nanos),
            cpu,
            memory,
        ))
    }
}

/// Samples a container through a runtime stats provider
pub struct RuntimeSampler {
    provider: Arc<dyn StatsProvider>,
    entity_id: String,
    entitlement: Entitlement,
    fetch_timeout: Duration,
}

impl RuntimeSampler {
    pub fn new(
        provider: Arc<dyn StatsProvider>,
        entity_id: impl Into<String>,
        entitlement: Entitlement,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            entity_id: entity_id.into(),
            entitlement,
            fetch_timeout,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

#[async_trait]
impl SampleSource for RuntimeSampler {
    fn kind(&self) -> SourceKind {
        SourceKind::Runtime
    }

    /// Make sure the entity exists before polling it
    async fn prime(&mut self) -> Result<()> {
        timeout(self.fetch_timeout, self.provider.locate(&self.entity_id))
            .await
            .map_err(|_| MeterError::FetchTimeout {
                after: self.fetch_timeout,
            })?
    }

    async fn sample(&mut self) -> Result<UtilizationSample> {
        let stats = timeout(
            self.fetch_timeout,
            self.provider.fetch_stats(&self.entity_id),
        )
        .await
        .map_err(|_| MeterError::FetchTimeout {
            after: self.fetch_timeout,
        })??;

        let cpu = compute_runtime_cpu(&stats, self.entitlement);
        let memory = compute_memory(stats.memory_used_bytes(), stats.memory_limit());

        Ok(UtilizationSample::new(
            SourceKind::Runtime,
            Some(stats.cpu_stats.cpu_usage.total_usage),
            cpu,
            memory,
        ))
    }
}

/// Requested sampling backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Cgroup files when a hierarchy is mounted, runtime stats otherwise
    #[default]
    Auto,
    Cgroup,
    Runtime,
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "cgroup" => Ok(BackendChoice::Cgroup),
            "runtime" => Ok(BackendChoice::Runtime),
            other => Err(format!(
                "unknown backend '{}', expected auto, cgroup or runtime",
                other
            )),
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::Auto => f.write_str("auto"),
            BackendChoice::Cgroup => f.write_str("cgroup"),
            BackendChoice::Runtime => f.write_str("runtime"),
        }
    }
}

/// What a sample source needs from the environment
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub cgroup_root: PathBuf,
    pub runtime_endpoint: String,
    /// Environment variable naming the monitored entity
    pub entity_id_var: String,
    pub fetch_timeout: Duration,
}

/// Build the sample source for `kind`
///
/// Every error returned here is permanent: monitoring stays off for the
/// run while the rest of the process carries on.
pub fn build_source(
    kind: SourceKind,
    settings: &SourceSettings,
    entitlement: Entitlement,
) -> Result<Box<dyn SampleSource>> {
    match kind {
        SourceKind::Cgroup => {
            let reader = CounterReader::new(&settings.cgroup_root);
            Ok(Box::new(CgroupSampler::new(reader, entitlement)))
        }
        SourceKind::Runtime => {
            let entity_id = entity_id_from_env(&settings.entity_id_var)?;
            let provider =
                HttpStatsProvider::new(&settings.runtime_endpoint, settings.fetch_timeout)?;
            info!(
                entity_id = %entity_id,
                endpoint = %settings.runtime_endpoint,
                "Monitoring container through runtime stats"
            );
            Ok(Box::new(RuntimeSampler::new(
                Arc::new(provider),
                entity_id,
                entitlement,
                settings.fetch_timeout,
            )))
        }
    }
}

/// Decide which backend to run based on what the environment exposes
pub async fn select_backend(choice: BackendChoice, cgroup_root: &Path) -> SourceKind {
    match choice {
        BackendChoice::Cgroup => SourceKind::Cgroup,
        BackendChoice::Runtime => SourceKind::Runtime,
        BackendChoice::Auto => match detect_cgroup_version(cgroup_root).await {
            CgroupVersion::V2 => {
                info!("Detected cgroup v2, sampling accounting files directly");
                SourceKind::Cgroup
            }
            CgroupVersion::V1 => {
                info!("Detected cgroup v1, sampling accounting files directly");
                SourceKind::Cgroup
            }
            CgroupVersion::Unknown => {
                info!("No cgroup hierarchy detected, using runtime stats");
                SourceKind::Runtime
            }
        },
    }
}
