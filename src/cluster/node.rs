//! Node resource - represents a worker machine in the minigrid cluster
//!
//! A Node is a capacity-bearing unit that can host Pods. Each Node:
//! - Registers with the control plane, declaring a fixed core count
//! - Has cores debited/credited as pods are placed and removed
//! - Sends heartbeats to stay schedulable
//! - Is driven into non-schedulable states by staleness or admin action

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Node is live and eligible for new placements
    Healthy,
    /// Node missed heartbeats; recoverable by a fresh heartbeat
    Unhealthy,
    /// Node is being vacated by an administrator
    Draining,
    /// Node was explicitly failed; recoverable only by repair
    Failed,
}

impl NodeState {
    /// Whether the node may receive new pods
    pub fn is_schedulable(self) -> bool {
        self == NodeState::Healthy
    }
}

/// A worker node in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node identity
    pub id: String,

    /// Total core count, fixed at registration
    pub total_cores: u32,

    /// Cores not currently reserved by pods
    pub available_cores: u32,

    /// Current lifecycle state
    pub state: NodeState,

    /// Last heartbeat received from this node
    pub last_heartbeat: DateTime<Utc>,

    /// Ids of pods assigned to this node, in creation order
    pub pods: Vec<String>,
}

impl Node {
    /// Create a freshly registered node with all cores available
    pub fn new(id: impl Into<String>, total_cores: u32) -> Self {
        Self {
            id: id.into(),
            total_cores,
            available_cores: total_cores,
            state: NodeState::Healthy,
            last_heartbeat: Utc::now(),
            pods: Vec::new(),
        }
    }

    /// Check if the node has missed heartbeats (stale)
    pub fn is_stale(&self, threshold_secs: i64) -> bool {
        (Utc::now() - self.last_heartbeat).num_seconds() > threshold_secs
    }

    /// Capture the fields a placement policy needs
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id.clone(),
            state: self.state,
            total_cores: self.total_cores,
            available_cores: self.available_cores,
        }
    }
}

/// Immutable view of a node handed to placement policies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: String,
    pub state: NodeState,
    pub total_cores: u32,
    pub available_cores: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_starts_healthy_and_empty() {
        let node = Node::new("node-1", 8);
        assert_eq!(node.total_cores, 8);
        assert_eq!(node.available_cores, 8);
        assert_eq!(node.state, NodeState::Healthy);
        assert!(node.pods.is_empty());
    }

    #[test]
    fn test_schedulable_states() {
        assert!(NodeState::Healthy.is_schedulable());
        assert!(!NodeState::Unhealthy.is_schedulable());
        assert!(!NodeState::Draining.is_schedulable());
        assert!(!NodeState::Failed.is_schedulable());
    }

    #[test]
    fn test_heartbeat_staleness() {
        let mut node = Node::new("node-1", 4);
        assert!(!node.is_stale(60));

        node.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
        assert!(node.is_stale(60));
    }

    #[test]
    fn test_snapshot_carries_capacity() {
        let mut node = Node::new("node-1", 4);
        node.available_cores = 1;
        let snap = node.snapshot();
        assert_eq!(snap.id, "node-1");
        assert_eq!(snap.total_cores, 4);
        assert_eq!(snap.available_cores, 1);
    }
}
