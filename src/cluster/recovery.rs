//! Failure recovery - relocates pods off non-schedulable nodes
//!
//! The reconciler walks the pods of a node that just became unhealthy,
//! draining, or failed, asks the placement policy for a new home for each,
//! and records every attempt in a bounded recovery log. A pod with nowhere
//! to go stays assigned to its node: the node is out of the scheduling pool
//! anyway, and a later re-trigger (e.g. once new capacity registers) runs
//! the same per-pod loop over whatever is still stranded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::node::NodeState;
use super::registry::{ClusterRegistry, RegistryError};
use super::scheduler::PlacementPolicy;

/// Outcome of one pod relocation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    /// Attempt created but not yet resolved
    Pending,
    /// Pod relocated to `to_node`
    Completed,
    /// No node could take the pod
    Failed,
}

/// One recorded relocation attempt. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOperation {
    pub pod_id: String,
    pub from_node: String,
    /// Set only when the relocation succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_node: Option<String>,
    pub status: RecoveryStatus,
    pub timestamp: DateTime<Utc>,
}

impl RecoveryOperation {
    fn completed(pod_id: &str, from_node: &str, to_node: &str) -> Self {
        Self {
            pod_id: pod_id.to_string(),
            from_node: from_node.to_string(),
            to_node: Some(to_node.to_string()),
            status: RecoveryStatus::Completed,
            timestamp: Utc::now(),
        }
    }

    fn failed(pod_id: &str, from_node: &str) -> Self {
        Self {
            pod_id: pod_id.to_string(),
            from_node: from_node.to_string(),
            to_node: None,
            status: RecoveryStatus::Failed,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded, queryable record of past relocation attempts.
///
/// Holds at most `capacity` entries (oldest dropped first) and prunes entries
/// older than the retention window on every append and query. The relocation
/// itself persists in node/pod state even after its record is pruned.
#[derive(Clone)]
pub struct RecoveryLog {
    entries: Arc<Mutex<VecDeque<RecoveryOperation>>>,
    capacity: usize,
    retention_secs: i64,
}

impl RecoveryLog {
    pub fn new(capacity: usize, retention_secs: i64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
            retention_secs,
        }
    }

    /// Append one operation, evicting expired and over-capacity entries.
    pub fn append(&self, op: RecoveryOperation) {
        let mut entries = self.lock();
        Self::prune_locked(&mut entries, self.retention_secs);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(op);
    }

    /// The most recent `n` operations, newest first.
    pub fn recent(&self, n: usize) -> Vec<RecoveryOperation> {
        let mut entries = self.lock();
        Self::prune_locked(&mut entries, self.retention_secs);
        entries.iter().rev().take(n).cloned().collect()
    }

    /// Operations still awaiting resolution.
    pub fn pending_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|op| op.status == RecoveryStatus::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn prune_locked(entries: &mut VecDeque<RecoveryOperation>, retention_secs: i64) {
        let cutoff = Utc::now() - Duration::seconds(retention_secs);
        while entries.front().is_some_and(|op| op.timestamp < cutoff) {
            entries.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<RecoveryOperation>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RecoveryLog {
    fn default() -> Self {
        Self::new(
            super::RECOVERY_LOG_CAPACITY,
            super::RECOVERY_RETENTION_SECS,
        )
    }
}

/// Snapshot of recovery activity for the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub operations: Vec<RecoveryOperation>,
    pub pending: usize,
    pub estimated_remaining_secs: u64,
}

/// Relocates pods off a node that left the scheduling pool.
#[derive(Clone)]
pub struct RecoveryReconciler {
    registry: ClusterRegistry,
    policy: Arc<dyn PlacementPolicy>,
    log: RecoveryLog,
}

impl RecoveryReconciler {
    pub fn new(registry: ClusterRegistry, policy: Arc<dyn PlacementPolicy>) -> Self {
        Self {
            registry,
            policy,
            log: RecoveryLog::default(),
        }
    }

    pub fn with_log(mut self, log: RecoveryLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> &RecoveryLog {
        &self.log
    }

    /// Relocate every pod on `node_id`, in creation order. Returns the
    /// operations recorded for this run. A problem with one pod is logged
    /// and the loop continues.
    pub fn recover_node(&self, node_id: &str) -> Vec<RecoveryOperation> {
        let pods = match self.registry.pods_on_node(node_id) {
            Ok(pods) => pods,
            Err(e) => {
                warn!(node = %node_id, error = %e, "recovery skipped");
                return Vec::new();
            }
        };
        let node_state = self.registry.get_node(node_id).map(|n| n.state);

        info!(
            node = %node_id,
            pods = pods.len(),
            policy = self.policy.name(),
            "reconciling node"
        );

        let mut operations = Vec::with_capacity(pods.len());
        for pod in pods {
            let op = match self.registry.relocate_pod(&pod.id, node_id, &*self.policy) {
                Ok(moved) => {
                    let target = moved.node_id;
                    debug!(pod = %pod.id, from = %node_id, to = %target, "pod relocated");
                    RecoveryOperation::completed(&pod.id, node_id, &target)
                }
                Err(RegistryError::ResourceExhausted { .. }) => {
                    // Nowhere to go: the pod keeps its reservation on the
                    // source node. Only a hard-failed node takes its pods
                    // down with it; an unhealthy one may still heartbeat
                    // back.
                    if node_state == Some(NodeState::Failed) {
                        self.registry.mark_pod_failed(&pod.id);
                    }
                    warn!(pod = %pod.id, from = %node_id, "no capacity for relocation");
                    RecoveryOperation::failed(&pod.id, node_id)
                }
                Err(e) => {
                    // The pod moved or vanished under us; record and move on.
                    warn!(pod = %pod.id, from = %node_id, error = %e, "relocation error");
                    RecoveryOperation::failed(&pod.id, node_id)
                }
            };
            self.log.append(op.clone());
            operations.push(op);
        }
        operations
    }

    /// Recent operations plus the simulated time remaining: pending count
    /// times the fixed per-operation duration.
    pub fn report(&self, recent: usize) -> RecoveryReport {
        let pending = self.log.pending_count();
        RecoveryReport {
            operations: self.log.recent(recent),
            pending,
            estimated_remaining_secs: pending as u64 * super::RECOVERY_OP_SECS,
        }
    }
}
