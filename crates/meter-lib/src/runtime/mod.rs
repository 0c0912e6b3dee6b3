//! Container runtime stats backend
//!
//! Used when the accounting files are not visible: the runtime reports
//! both the current and the previous CPU reading in one snapshot.

mod provider;
mod stats;

pub use provider::{entity_id_from_env, HttpStatsProvider, StatsProvider, DEFAULT_ENTITY_ID_VAR};
pub use stats::{ContainerStats, CpuStats, CpuUsage, MemoryStats, StatsPayload};
