//! Pod resource - a schedulable workload consuming a fixed core allotment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodPhase {
    /// Placed on a node, still starting up
    Pending,
    /// Started and serving
    Running,
    /// Stranded on a failed node with nowhere to go
    Failed,
}

/// A workload placed on exactly one node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// Unique pod identity
    pub id: String,

    /// Node currently hosting this pod
    pub node_id: String,

    /// Cores reserved on the hosting node, fixed at creation
    pub cpu_required: u32,

    /// Current lifecycle phase
    pub phase: PodPhase,

    /// When the pod was scheduled
    pub created_at: DateTime<Utc>,
}

impl Pod {
    /// Create a pod freshly placed on a node
    pub fn new(id: impl Into<String>, node_id: impl Into<String>, cpu_required: u32) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            cpu_required,
            phase: PodPhase::Pending,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pod_is_pending() {
        let pod = Pod::new("pod-1", "node-1", 2);
        assert_eq!(pod.phase, PodPhase::Pending);
        assert_eq!(pod.node_id, "node-1");
        assert_eq!(pod.cpu_required, 2);
    }

    #[test]
    fn test_phase_serialization_is_lowercase() {
        let json = serde_json::to_string(&PodPhase::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }
}
