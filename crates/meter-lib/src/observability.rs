//! Structured logging for meter events
//!
//! Every event carries an `event` field so JSON log consumers can filter on
//! it. The per-tick `utilization_sample` event is the meter's output; its
//! field names are stable.

use crate::error::MeterError;
use crate::models::{Entitlement, SourceKind, UtilizationSample};
use tracing::{error, info, warn};

/// Structured logger for meter events
///
/// Tags every event with the name of the monitored execution unit.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    unit: String,
}

impl StructuredLogger {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Log meter startup
    pub fn log_startup(&self, version: &str, source: SourceKind) {
        info!(
            event = "meter_started",
            unit = %self.unit,
            meter_version = %version,
            backend = %source,
            "Usage meter started"
        );
    }

    /// Log the entitlement resolved at startup
    pub fn log_entitlement(&self, entitlement: Entitlement) {
        info!(
            event = "entitlement_resolved",
            unit = %self.unit,
            cpu_limit = entitlement.cores(),
            "Detected container CPU limit: {} CPUs",
            entitlement
        );
    }

    /// Log one computed sample
    pub fn log_sample(&self, sample: &UtilizationSample) {
        info!(
            event = "utilization_sample",
            unit = %self.unit,
            backend = %sample.source,
            cpu_usage_nanos = ?sample.cpu_usage_nanos,
            raw_cpu_percent = sample.raw_cpu_percent,
            effective_cpu_percent = sample.effective_cpu_percent,
            memory_used_mb = sample.memory_used_mb,
            memory_limit_mb = ?sample.memory_limit_mb,
            memory_usage_percent = ?sample.memory_usage_percent,
            "Raw CPU {:.2}%, effective CPU {:.2}%, memory {:.2} MB",
            sample.raw_cpu_percent,
            sample.effective_cpu_percent,
            sample.memory_used_mb
        );
    }

    /// Log a tick that produced no sample
    pub fn log_tick_skipped(&self, source: SourceKind, err: &MeterError) {
        error!(
            event = "tick_skipped",
            unit = %self.unit,
            backend = %source,
            error = %err,
            "Error fetching container stats, skipping tick"
        );
    }

    /// Log a monitoring path being switched off for the rest of the run
    pub fn log_monitoring_disabled(&self, source: SourceKind, err: &MeterError) {
        warn!(
            event = "monitoring_disabled",
            unit = %self.unit,
            backend = %source,
            error = %err,
            "Monitoring path disabled for this run"
        );
    }

    /// Log meter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "meter_shutdown",
            unit = %self.unit,
            reason = %reason,
            "Usage meter shutting down"
        );
    }
}
