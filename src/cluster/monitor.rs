//! Health monitor - periodic staleness sweep over the node registry
//!
//! Runs as a background task on the control plane. Each tick it transitions
//! healthy nodes whose heartbeat has gone stale to unhealthy and hands each
//! one to the recovery reconciler. The loop awaits every sweep before the
//! next tick, so sweeps never overlap; the registry's lock serializes the
//! sweep against concurrent placements and moves.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::recovery::RecoveryReconciler;
use super::registry::ClusterRegistry;

/// Configuration for the health monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sweep period in seconds
    pub period_secs: u64,
    /// Maximum heartbeat age before a node is considered stale
    pub staleness_threshold_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period_secs: super::HEALTH_SWEEP_INTERVAL_SECS,
            staleness_threshold_secs: super::STALENESS_THRESHOLD_SECS,
        }
    }
}

/// Run one staleness sweep: mark stale nodes unhealthy, then reconcile each.
/// Returns the ids of nodes that transitioned this sweep. A problem with one
/// node is recorded and the sweep continues with the rest.
pub fn run_sweep(
    registry: &ClusterRegistry,
    reconciler: &RecoveryReconciler,
    threshold_secs: i64,
) -> Vec<String> {
    let stale = registry.mark_stale_nodes(threshold_secs);
    for node_id in &stale {
        warn!(node = %node_id, "node heartbeat stale, marked unhealthy");
        let ops = reconciler.recover_node(node_id);
        let moved = ops
            .iter()
            .filter(|op| op.to_node.is_some())
            .count();
        info!(
            node = %node_id,
            relocated = moved,
            stranded = ops.len() - moved,
            "recovery sweep finished"
        );
    }
    stale
}

/// Spawn the health monitor as a background task.
///
/// Returns a shutdown sender; send `true` to stop the loop.
pub fn spawn_health_monitor(
    registry: ClusterRegistry,
    reconciler: RecoveryReconciler,
    config: MonitorConfig,
) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.period_secs));
        info!(
            period_secs = config.period_secs,
            threshold_secs = config.staleness_threshold_secs,
            "health monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stale = run_sweep(&registry, &reconciler, config.staleness_threshold_secs);
                    if stale.is_empty() {
                        debug!("sweep clean");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("health monitor shutting down");
                        break;
                    }
                }
            }
        }
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cluster::node::NodeState;
    use crate::cluster::scheduler::FirstFit;

    #[test]
    fn test_sweep_marks_and_recovers_stale_node() {
        let registry = ClusterRegistry::new();
        registry.register_node(Some("stale".into()), 4).unwrap();
        registry.add_pod("stale", "p1", 2).unwrap();
        let reconciler = RecoveryReconciler::new(registry.clone(), Arc::new(FirstFit));

        // Let the first node's heartbeat age past a zero threshold, then
        // bring up a fresh spare.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        registry.register_node(Some("spare".into()), 4).unwrap();

        let transitioned = run_sweep(&registry, &reconciler, 0);

        assert_eq!(transitioned, vec!["stale".to_string()]);
        assert_eq!(
            registry.get_node("stale").unwrap().state,
            NodeState::Unhealthy
        );
        assert_eq!(registry.get_pod("p1").unwrap().node_id, "spare");
    }

    #[test]
    fn test_sweep_skips_fresh_nodes() {
        let registry = ClusterRegistry::new();
        registry.register_node(Some("fresh".into()), 4).unwrap();
        let reconciler = RecoveryReconciler::new(registry.clone(), Arc::new(FirstFit));

        let transitioned = run_sweep(&registry, &reconciler, 3600);
        assert!(transitioned.is_empty());
        assert_eq!(
            registry.get_node("fresh").unwrap().state,
            NodeState::Healthy
        );
    }

    #[test]
    fn test_stale_node_excluded_until_heartbeat_returns() {
        let registry = ClusterRegistry::new();
        registry.register_node(Some("n1".into()), 8).unwrap();
        let reconciler = RecoveryReconciler::new(registry.clone(), Arc::new(FirstFit));

        run_sweep(&registry, &reconciler, -1);
        assert_eq!(
            registry.get_node("n1").unwrap().state,
            NodeState::Unhealthy
        );
        assert!(registry.schedule_pod(1, &FirstFit).is_err());

        registry
            .record_heartbeat("n1", &std::collections::HashMap::new())
            .unwrap();
        assert!(registry.schedule_pod(1, &FirstFit).is_ok());
    }

    #[tokio::test]
    async fn test_monitor_task_shutdown() {
        let registry = ClusterRegistry::new();
        let reconciler = RecoveryReconciler::new(registry.clone(), Arc::new(FirstFit));
        let shutdown = spawn_health_monitor(
            registry,
            reconciler,
            MonitorConfig {
                period_secs: 1,
                staleness_threshold_secs: 90,
            },
        );
        shutdown.send(true).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
