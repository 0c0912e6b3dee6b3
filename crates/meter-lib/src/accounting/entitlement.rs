//! CPU entitlement resolution
//!
//! Tries the cgroup v1 CFS quota pair first and `cpu.max` second. Anything
//! else, including every probe failing, resolves to one full core.

use super::{first_available, CfsQuotaProbe, CpuMaxProbe, Probe};
use crate::models::Entitlement;
use std::path::PathBuf;

/// Resolves the fraction of a core granted to this execution unit
pub struct EntitlementResolver {
    probes: Vec<Box<dyn Probe<Value = Entitlement>>>,
}

impl EntitlementResolver {
    /// Resolver over the standard cgroup layout under `cgroup_root`
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = cgroup_root.into();
        Self::with_probes(vec![
            Box::new(CfsQuotaProbe::in_dir(&root.join("cpu"))),
            Box::new(CpuMaxProbe::cpu_max(root.join("cpu.max"))),
        ])
    }

    /// Resolver over an explicit, ordered list of probes
    pub fn with_probes(probes: Vec<Box<dyn Probe<Value = Entitlement>>>) -> Self {
        Self { probes }
    }

    /// Resolve the entitlement
    ///
    /// Never fails and has no side effects beyond logging, so repeated calls
    /// over unchanged files return the same value.
    pub async fn resolve(&self) -> Entitlement {
        first_available(&self.probes)
            .await
            .unwrap_or(Entitlement::UNCONSTRAINED)
    }
}
