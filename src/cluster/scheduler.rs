//! Placement policies - pure decision functions over node snapshots
//!
//! A policy never mutates registry state; it only inspects a snapshot taken
//! under the registry's exclusion boundary. Alternative policies (best-fit,
//! load-balanced) slot in behind the same trait without touching the registry
//! or reconciler.

use tracing::trace;

use super::node::NodeSnapshot;

/// A placement decision: which node, if any, should host `cpu_required` cores.
pub trait PlacementPolicy: Send + Sync {
    /// Return the id of the chosen node, or `None` if no node qualifies.
    /// Must be deterministic for a given snapshot order.
    fn select(&self, cpu_required: u32, nodes: &[NodeSnapshot]) -> Option<String>;

    /// Policy name for logs.
    fn name(&self) -> &'static str;
}

/// Default policy: first healthy node with enough free cores, scanning in
/// registration order. No optimization, no tightest-fit seeking.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

impl PlacementPolicy for FirstFit {
    fn select(&self, cpu_required: u32, nodes: &[NodeSnapshot]) -> Option<String> {
        let target = nodes
            .iter()
            .filter(|n| n.state.is_schedulable() && n.available_cores > 0)
            .find(|n| n.available_cores >= cpu_required)
            .map(|n| n.id.clone());
        trace!(cores = cpu_required, target = ?target, "first-fit selection");
        target
    }

    fn name(&self) -> &'static str {
        "first-fit"
    }
}
