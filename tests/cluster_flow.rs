//! End-to-end flows over the cluster engine: scheduling, staleness sweeps,
//! failure recovery, drain and repair.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use minigrid::cluster::{
    run_sweep, ClusterRegistry, FirstFit, NodeState, PlacementPolicy, PodPhase,
    RecoveryReconciler, RecoveryStatus,
};

fn cluster() -> (ClusterRegistry, RecoveryReconciler) {
    let registry = ClusterRegistry::new();
    let reconciler = RecoveryReconciler::new(registry.clone(), Arc::new(FirstFit));
    (registry, reconciler)
}

fn assert_capacity_invariant(registry: &ClusterRegistry) {
    for node in registry.list_nodes() {
        let reserved: u32 = registry
            .pods_on_node(&node.id)
            .unwrap()
            .iter()
            .map(|p| p.cpu_required)
            .sum();
        assert_eq!(
            node.available_cores + reserved,
            node.total_cores,
            "capacity invariant violated on {}",
            node.id
        );
    }
}

#[test]
fn first_fit_skips_undersized_nodes() {
    let (registry, _) = cluster();
    registry.register_node(Some("a".into()), 2).unwrap();
    registry.register_node(Some("b".into()), 4).unwrap();

    for _ in 0..3 {
        // Deterministic: A can never take 3 cores.
        let snapshot = registry.node_snapshots();
        assert_eq!(FirstFit.select(3, &snapshot).as_deref(), Some("b"));
    }

    let pod = registry.schedule_pod(3, &FirstFit).unwrap();
    assert_eq!(pod.node_id, "b");
    assert_capacity_invariant(&registry);
}

#[test]
fn capacity_holds_through_schedule_move_remove() {
    let (registry, _) = cluster();
    registry.register_node(Some("a".into()), 8).unwrap();
    registry.register_node(Some("b".into()), 8).unwrap();

    let p1 = registry.schedule_pod(3, &FirstFit).unwrap();
    let p2 = registry.schedule_pod(2, &FirstFit).unwrap();
    assert_capacity_invariant(&registry);

    registry.move_pod(&p1.id, &p1.node_id, "b").unwrap();
    assert_capacity_invariant(&registry);

    registry.remove_pod(&p2.id).unwrap();
    registry.remove_pod(&p1.id).unwrap();
    assert_capacity_invariant(&registry);
    assert_eq!(registry.get_node("a").unwrap().available_cores, 8);
    assert_eq!(registry.get_node("b").unwrap().available_cores, 8);
}

#[test]
fn stale_node_is_marked_and_excluded_until_heartbeat() {
    let (registry, reconciler) = cluster();
    registry.register_node(Some("n1".into()), 8).unwrap();

    // A negative threshold makes the fresh heartbeat count as stale.
    let transitioned = run_sweep(&registry, &reconciler, -1);
    assert_eq!(transitioned, vec!["n1".to_string()]);
    assert_eq!(registry.get_node("n1").unwrap().state, NodeState::Unhealthy);

    // Excluded from placement while unhealthy.
    assert!(registry.schedule_pod(1, &FirstFit).is_err());

    // A fresh heartbeat re-admits it.
    registry.record_heartbeat("n1", &HashMap::new()).unwrap();
    assert_eq!(registry.get_node("n1").unwrap().state, NodeState::Healthy);
    assert!(registry.schedule_pod(1, &FirstFit).is_ok());
}

#[test]
fn failure_recovery_relocates_all_pods() {
    let (registry, reconciler) = cluster();
    registry.register_node(Some("n".into()), 4).unwrap();
    registry.register_node(Some("m".into()), 4).unwrap();
    registry.add_pod("n", "p1", 1).unwrap();
    registry.add_pod("n", "p2", 1).unwrap();

    registry.mark_failed("n").unwrap();
    let ops = reconciler.recover_node("n");

    assert_eq!(ops.len(), 2);
    assert!(ops
        .iter()
        .all(|op| op.status == RecoveryStatus::Completed && op.to_node.as_deref() == Some("m")));
    assert_eq!(registry.get_pod("p1").unwrap().node_id, "m");
    assert_eq!(registry.get_pod("p2").unwrap().node_id, "m");
    assert_capacity_invariant(&registry);
}

#[test]
fn failed_recovery_strands_pod_without_crashing() {
    let (registry, reconciler) = cluster();
    registry.register_node(Some("n".into()), 8).unwrap();
    registry.register_node(Some("m".into()), 4).unwrap();
    registry.add_pod("n", "big", 5).unwrap();

    registry.mark_failed("n").unwrap();
    let ops = reconciler.recover_node("n");

    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].status, RecoveryStatus::Failed);
    assert!(ops[0].to_node.is_none());
    let pod = registry.get_pod("big").unwrap();
    assert_eq!(pod.node_id, "n");
    assert_eq!(pod.phase, PodPhase::Failed);
    assert_capacity_invariant(&registry);
}

#[test]
fn drain_evacuates_then_repair_readmits() {
    let (registry, reconciler) = cluster();
    registry.register_node(Some("n".into()), 4).unwrap();
    registry.register_node(Some("m".into()), 4).unwrap();
    registry.add_pod("n", "p1", 2).unwrap();

    registry.drain_node("n").unwrap();
    let ops = reconciler.recover_node("n");
    assert_eq!(ops[0].status, RecoveryStatus::Completed);
    assert_eq!(registry.get_pod("p1").unwrap().node_id, "m");
    assert_eq!(registry.get_node("n").unwrap().state, NodeState::Draining);

    // Repair re-admits the node but does not pull pods back.
    registry.repair_node("n").unwrap();
    assert_eq!(registry.get_node("n").unwrap().state, NodeState::Healthy);
    assert_eq!(registry.get_pod("p1").unwrap().node_id, "m");

    // New placements favor "n" again: it is first in registration order
    // with all cores free.
    let pod = registry.schedule_pod(4, &FirstFit).unwrap();
    assert_eq!(pod.node_id, "n");
}

#[test]
fn sweep_recovers_stale_node_workloads() {
    let (registry, reconciler) = cluster();
    registry.register_node(Some("stale".into()), 4).unwrap();
    registry.add_pod("stale", "p1", 2).unwrap();

    // Age the first node's heartbeat past a zero threshold, then bring up
    // a fresh spare for the reconciler to target.
    std::thread::sleep(Duration::from_millis(1100));
    registry.register_node(Some("spare".into()), 4).unwrap();

    run_sweep(&registry, &reconciler, 0);

    assert_eq!(
        registry.get_node("stale").unwrap().state,
        NodeState::Unhealthy
    );
    let pod = registry.get_pod("p1").unwrap();
    assert_eq!(pod.node_id, "spare");
    // Soft failure: the pod survived the move.
    assert_eq!(pod.phase, PodPhase::Running);
    assert_capacity_invariant(&registry);
}

#[test]
fn recovery_log_tracks_every_attempt() {
    let (registry, reconciler) = cluster();
    registry.register_node(Some("n".into()), 4).unwrap();
    registry.register_node(Some("m".into()), 2).unwrap();
    registry.add_pod("n", "p1", 1).unwrap();
    registry.add_pod("n", "p2", 3).unwrap();

    registry.mark_failed("n").unwrap();
    reconciler.recover_node("n");

    let report = reconciler.report(10);
    assert_eq!(report.operations.len(), 2);
    let completed = report
        .operations
        .iter()
        .filter(|op| op.status == RecoveryStatus::Completed)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(report.pending, 0);
    assert_eq!(report.estimated_remaining_secs, 0);
}

#[tokio::test]
async fn scheduled_pod_starts_after_delay() {
    let (registry, _) = cluster();
    registry.register_node(Some("n".into()), 4).unwrap();

    let pod = registry.schedule_pod(2, &FirstFit).unwrap();
    assert_eq!(pod.phase, PodPhase::Pending);

    registry.spawn_pod_start(pod.id.clone(), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(registry.get_pod(&pod.id).unwrap().phase, PodPhase::Running);
}
