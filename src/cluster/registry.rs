//! Cluster registry - the single source of truth for node and pod state
//!
//! The registry owns every node and pod and exposes atomic mutation and read
//! operations. All state lives behind one `RwLock`: every mutation is a single
//! write-lock critical section, so mutations are linearizable and a pod move
//! debits and credits both nodes inside one critical section. The health
//! monitor's sweep and the reconciler's moves queue on the same lock as any
//! other caller.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::node::{Node, NodeSnapshot, NodeState};
use super::pod::{Pod, PodPhase};
use super::scheduler::PlacementPolicy;

/// Errors produced by registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("pod '{0}' not found")]
    PodNotFound(String),

    #[error("node '{0}' already registered")]
    DuplicateNodeId(String),

    #[error("pod '{0}' already exists")]
    DuplicatePodId(String),

    #[error("invalid capacity: {0} (must be a positive core count)")]
    InvalidCapacity(i64),

    #[error("node '{node}' has {available} cores available, {requested} requested")]
    InsufficientCapacity {
        node: String,
        requested: u32,
        available: u32,
    },

    #[error("node '{node}' is {state:?} and cannot accept pods")]
    NodeNotSchedulable { node: String, state: NodeState },

    #[error("pod '{pod}' is on node '{actual}', expected '{expected}'")]
    PodNotOnExpectedNode {
        pod: String,
        expected: String,
        actual: String,
    },

    #[error("no node can satisfy a request for {requested} cores")]
    ResourceExhausted { requested: u32 },

    #[error("node '{node}' still hosts {pods} pod(s)")]
    NodeNotEmpty { node: String, pods: usize },
}

/// Aggregate view of the cluster, returned by status endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    /// Sum over all nodes; wider than a single node's count so large
    /// clusters cannot overflow the aggregate.
    pub total_cores: u64,
    pub available_cores: u64,
    pub total_pods: usize,
    pub running_pods: usize,
    pub pending_pods: usize,
    pub failed_pods: usize,
}

/// Interior state guarded by the registry lock
#[derive(Default)]
struct RegistryState {
    /// Nodes indexed by id
    nodes: HashMap<String, Node>,
    /// Node ids in registration order; the placement scan order
    node_order: Vec<String>,
    /// Pods indexed by id
    pods: HashMap<String, Pod>,
}

/// The cluster registry. Cheap to clone; clones share the same state.
#[derive(Clone, Default)]
pub struct ClusterRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Node lifecycle
    // =========================================================================

    /// Register a new node with a fixed core count.
    ///
    /// When `id` is `None` an id is generated. A caller-supplied id that
    /// already exists is rejected.
    pub fn register_node(
        &self,
        id: Option<String>,
        total_cores: u32,
    ) -> Result<Node, RegistryError> {
        if total_cores == 0 {
            return Err(RegistryError::InvalidCapacity(0));
        }

        let mut state = self.write();
        let id = id.unwrap_or_else(|| format!("node-{}", Uuid::new_v4()));
        if state.nodes.contains_key(&id) {
            return Err(RegistryError::DuplicateNodeId(id));
        }

        let node = Node::new(id.clone(), total_cores);
        state.node_order.push(id.clone());
        state.nodes.insert(id.clone(), node.clone());
        debug!(node = %id, cores = total_cores, "node registered");
        Ok(node)
    }

    /// Remove a node. Refused while any pod is still assigned to it; removal
    /// is an explicit administrative act, never implicit.
    pub fn remove_node(&self, id: &str) -> Result<Node, RegistryError> {
        let mut state = self.write();
        let node = state
            .nodes
            .get(id)
            .ok_or_else(|| RegistryError::NodeNotFound(id.to_string()))?;
        if !node.pods.is_empty() {
            return Err(RegistryError::NodeNotEmpty {
                node: id.to_string(),
                pods: node.pods.len(),
            });
        }

        let node = state.nodes.remove(id).expect("checked above");
        state.node_order.retain(|n| n != id);
        debug!(node = %id, "node removed");
        Ok(node)
    }

    /// Record a heartbeat from a node.
    ///
    /// Refreshes `last_heartbeat` and applies any reported phases for pods
    /// that still belong to the node; unknown pod ids are ignored. A
    /// heartbeat lifts `Unhealthy` back to `Healthy`, but `Draining` and
    /// `Failed` are administrative states only `repair` can clear.
    pub fn record_heartbeat(
        &self,
        node_id: &str,
        pod_phases: &HashMap<String, PodPhase>,
    ) -> Result<(), RegistryError> {
        let mut state = self.write();
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::NodeNotFound(node_id.to_string()))?;

        node.last_heartbeat = Utc::now();
        if node.state == NodeState::Unhealthy {
            debug!(node = %node_id, "node recovered via heartbeat");
            node.state = NodeState::Healthy;
        }

        for (pod_id, phase) in pod_phases {
            if let Some(pod) = state.pods.get_mut(pod_id) {
                if pod.node_id == node_id {
                    pod.phase = *phase;
                }
            }
        }
        Ok(())
    }

    /// Mark a node as draining. The caller is expected to reconcile it next.
    pub fn drain_node(&self, id: &str) -> Result<(), RegistryError> {
        self.set_node_state(id, NodeState::Draining)
    }

    /// Mark a node as failed. The caller is expected to reconcile it next.
    pub fn mark_failed(&self, id: &str) -> Result<(), RegistryError> {
        self.set_node_state(id, NodeState::Failed)
    }

    /// Repair a node: back to healthy with a fresh heartbeat. Pods are not
    /// pulled back; the node simply rejoins the scheduling pool.
    pub fn repair_node(&self, id: &str) -> Result<Node, RegistryError> {
        let mut state = self.write();
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::NodeNotFound(id.to_string()))?;
        node.state = NodeState::Healthy;
        node.last_heartbeat = Utc::now();
        debug!(node = %id, "node repaired");
        Ok(node.clone())
    }

    /// Transition healthy nodes whose heartbeat age exceeds the threshold to
    /// unhealthy. Returns the transitioned ids in registration order. Nodes
    /// already unhealthy, draining, or failed are skipped so they do not
    /// re-trigger recovery every sweep.
    pub fn mark_stale_nodes(&self, threshold_secs: i64) -> Vec<String> {
        let mut state = self.write();
        let mut transitioned = Vec::new();
        let order = state.node_order.clone();
        for id in order {
            if let Some(node) = state.nodes.get_mut(&id) {
                if node.state == NodeState::Healthy && node.is_stale(threshold_secs) {
                    node.state = NodeState::Unhealthy;
                    transitioned.push(id);
                }
            }
        }
        transitioned
    }

    fn set_node_state(&self, id: &str, target: NodeState) -> Result<(), RegistryError> {
        let mut state = self.write();
        let node = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| RegistryError::NodeNotFound(id.to_string()))?;
        node.state = target;
        Ok(())
    }

    // =========================================================================
    // Pod lifecycle
    // =========================================================================

    /// Place a pod on a specific node, debiting its capacity.
    ///
    /// The pod starts out `Pending` and stays there until the caller drives
    /// the transition: [`spawn_pod_start`](Self::spawn_pod_start) for the
    /// simulated start-up delay, [`mark_pod_running`](Self::mark_pod_running)
    /// directly, or a node heartbeat reporting the pod's phase. Moves through
    /// [`move_pod`](Self::move_pod) set the pod running themselves.
    pub fn add_pod(
        &self,
        node_id: &str,
        pod_id: &str,
        cpu_required: u32,
    ) -> Result<Pod, RegistryError> {
        if cpu_required == 0 {
            return Err(RegistryError::InvalidCapacity(0));
        }
        let mut state = self.write();
        Self::add_pod_locked(&mut state, node_id, pod_id, cpu_required)
    }

    fn add_pod_locked(
        state: &mut RegistryState,
        node_id: &str,
        pod_id: &str,
        cpu_required: u32,
    ) -> Result<Pod, RegistryError> {
        if state.pods.contains_key(pod_id) {
            return Err(RegistryError::DuplicatePodId(pod_id.to_string()));
        }
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::NodeNotFound(node_id.to_string()))?;
        if !node.state.is_schedulable() {
            return Err(RegistryError::NodeNotSchedulable {
                node: node_id.to_string(),
                state: node.state,
            });
        }
        if cpu_required > node.available_cores {
            return Err(RegistryError::InsufficientCapacity {
                node: node_id.to_string(),
                requested: cpu_required,
                available: node.available_cores,
            });
        }

        node.available_cores -= cpu_required;
        node.pods.push(pod_id.to_string());
        let pod = Pod::new(pod_id, node_id, cpu_required);
        state.pods.insert(pod_id.to_string(), pod.clone());
        debug!(pod = %pod_id, node = %node_id, cores = cpu_required, "pod placed");
        Ok(pod)
    }

    /// Pick a node with the given policy and place a new pod there, all under
    /// one critical section so the chosen capacity cannot be raced away.
    pub fn schedule_pod(
        &self,
        cpu_required: u32,
        policy: &dyn PlacementPolicy,
    ) -> Result<Pod, RegistryError> {
        if cpu_required == 0 {
            return Err(RegistryError::InvalidCapacity(0));
        }
        let mut state = self.write();
        let snapshots = Self::snapshots_locked(&state, None);
        let target = policy
            .select(cpu_required, &snapshots)
            .ok_or(RegistryError::ResourceExhausted {
                requested: cpu_required,
            })?;
        let pod_id = format!("pod-{}", Uuid::new_v4());
        Self::add_pod_locked(&mut state, &target, &pod_id, cpu_required)
    }

    /// Move a pod between two nodes.
    ///
    /// The expected source node guards against racing reconcilers. On any
    /// failure nothing is mutated; on success the target is debited, the
    /// source credited, and the pod reassigned and set running, all within
    /// one critical section.
    pub fn move_pod(
        &self,
        pod_id: &str,
        from_node: &str,
        to_node: &str,
    ) -> Result<Pod, RegistryError> {
        let mut state = self.write();
        Self::move_pod_locked(&mut state, pod_id, from_node, to_node)
    }

    fn move_pod_locked(
        state: &mut RegistryState,
        pod_id: &str,
        from_node: &str,
        to_node: &str,
    ) -> Result<Pod, RegistryError> {
        let pod = state
            .pods
            .get(pod_id)
            .ok_or_else(|| RegistryError::PodNotFound(pod_id.to_string()))?;
        if pod.node_id != from_node {
            return Err(RegistryError::PodNotOnExpectedNode {
                pod: pod_id.to_string(),
                expected: from_node.to_string(),
                actual: pod.node_id.clone(),
            });
        }
        let cpu = pod.cpu_required;

        if !state.nodes.contains_key(from_node) {
            return Err(RegistryError::NodeNotFound(from_node.to_string()));
        }
        let target = state
            .nodes
            .get(to_node)
            .ok_or_else(|| RegistryError::NodeNotFound(to_node.to_string()))?;
        if cpu > target.available_cores {
            return Err(RegistryError::InsufficientCapacity {
                node: to_node.to_string(),
                requested: cpu,
                available: target.available_cores,
            });
        }

        // All checks passed; apply both sides.
        {
            let target = state.nodes.get_mut(to_node).expect("checked above");
            target.available_cores -= cpu;
            target.pods.push(pod_id.to_string());
        }
        {
            let source = state.nodes.get_mut(from_node).expect("checked above");
            source.available_cores += cpu;
            source.pods.retain(|p| p != pod_id);
        }
        let pod = state.pods.get_mut(pod_id).expect("checked above");
        pod.node_id = to_node.to_string();
        pod.phase = PodPhase::Running;
        debug!(pod = %pod_id, from = %from_node, to = %to_node, "pod moved");
        Ok(pod.clone())
    }

    /// Pick a new home for a pod, excluding its current node, and move it
    /// there. Selection and move share one critical section.
    pub fn relocate_pod(
        &self,
        pod_id: &str,
        from_node: &str,
        policy: &dyn PlacementPolicy,
    ) -> Result<Pod, RegistryError> {
        let mut state = self.write();
        let cpu = {
            let pod = state
                .pods
                .get(pod_id)
                .ok_or_else(|| RegistryError::PodNotFound(pod_id.to_string()))?;
            if pod.node_id != from_node {
                return Err(RegistryError::PodNotOnExpectedNode {
                    pod: pod_id.to_string(),
                    expected: from_node.to_string(),
                    actual: pod.node_id.clone(),
                });
            }
            pod.cpu_required
        };

        let snapshots = Self::snapshots_locked(&state, Some(from_node));
        let target =
            policy
                .select(cpu, &snapshots)
                .ok_or(RegistryError::ResourceExhausted { requested: cpu })?;
        Self::move_pod_locked(&mut state, pod_id, from_node, &target)
    }

    /// Delete a pod and credit its cores back to the owning node.
    pub fn remove_pod(&self, pod_id: &str) -> Result<Pod, RegistryError> {
        let mut state = self.write();
        let pod = state
            .pods
            .remove(pod_id)
            .ok_or_else(|| RegistryError::PodNotFound(pod_id.to_string()))?;
        if let Some(node) = state.nodes.get_mut(&pod.node_id) {
            node.available_cores += pod.cpu_required;
            node.pods.retain(|p| p != pod_id);
        } else {
            // The owning node is meant to outlive its pods.
            warn!(pod = %pod_id, node = %pod.node_id, "pod removed from unknown node");
        }
        debug!(pod = %pod_id, "pod removed");
        Ok(pod)
    }

    /// Flip a pod from pending to running; no-op if it was deleted or has
    /// already left pending.
    pub fn mark_pod_running(&self, pod_id: &str) {
        let mut state = self.write();
        if let Some(pod) = state.pods.get_mut(pod_id) {
            if pod.phase == PodPhase::Pending {
                pod.phase = PodPhase::Running;
                debug!(pod = %pod_id, "pod running");
            }
        }
    }

    /// Mark a pod failed (stranded on a failed node).
    pub fn mark_pod_failed(&self, pod_id: &str) {
        let mut state = self.write();
        if let Some(pod) = state.pods.get_mut(pod_id) {
            pod.phase = PodPhase::Failed;
        }
    }

    /// Simulate pod start-up: schedule the pending→running transition after
    /// a fixed delay. Must be called from within a tokio runtime.
    pub fn spawn_pod_start(&self, pod_id: String, delay: Duration) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.mark_pod_running(&pod_id);
        });
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get_node(&self, id: &str) -> Option<Node> {
        self.read().nodes.get(id).cloned()
    }

    /// All nodes in registration order.
    pub fn list_nodes(&self) -> Vec<Node> {
        let state = self.read();
        state
            .node_order
            .iter()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect()
    }

    pub fn get_pod(&self, id: &str) -> Option<Pod> {
        self.read().pods.get(id).cloned()
    }

    /// All pods, ordered by creation time.
    pub fn list_pods(&self) -> Vec<Pod> {
        let state = self.read();
        let mut pods: Vec<Pod> = state.pods.values().cloned().collect();
        pods.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pods
    }

    /// Pods on one node, in creation order.
    pub fn pods_on_node(&self, node_id: &str) -> Result<Vec<Pod>, RegistryError> {
        let state = self.read();
        let node = state
            .nodes
            .get(node_id)
            .ok_or_else(|| RegistryError::NodeNotFound(node_id.to_string()))?;
        Ok(node
            .pods
            .iter()
            .filter_map(|id| state.pods.get(id).cloned())
            .collect())
    }

    /// Snapshots of all nodes in registration order, for placement policies.
    pub fn node_snapshots(&self) -> Vec<NodeSnapshot> {
        Self::snapshots_locked(&self.read(), None)
    }

    fn snapshots_locked(state: &RegistryState, exclude: Option<&str>) -> Vec<NodeSnapshot> {
        state
            .node_order
            .iter()
            .filter(|id| exclude != Some(id.as_str()))
            .filter_map(|id| state.nodes.get(id).map(Node::snapshot))
            .collect()
    }

    /// Aggregate cluster statistics.
    pub fn summary(&self) -> ClusterSummary {
        let state = self.read();
        let mut summary = ClusterSummary {
            total_nodes: state.nodes.len(),
            healthy_nodes: 0,
            total_cores: 0,
            available_cores: 0,
            total_pods: state.pods.len(),
            running_pods: 0,
            pending_pods: 0,
            failed_pods: 0,
        };
        for node in state.nodes.values() {
            if node.state == NodeState::Healthy {
                summary.healthy_nodes += 1;
            }
            summary.total_cores += u64::from(node.total_cores);
            summary.available_cores += u64::from(node.available_cores);
        }
        for pod in state.pods.values() {
            match pod.phase {
                PodPhase::Running => summary.running_pods += 1,
                PodPhase::Pending => summary.pending_pods += 1,
                PodPhase::Failed => summary.failed_pods += 1,
            }
        }
        summary
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
