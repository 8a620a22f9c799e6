//! Control plane API server
//!
//! Thin REST surface over the registry, scheduler, and reconciler. Holds no
//! cluster state of its own; it maps requests to registry operations and
//! registry errors to status codes. One versioned wire schema (camelCase),
//! no legacy response shapes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::node::Node;
use super::pod::{Pod, PodPhase};
use super::provision::{NoopProvisioner, Provisioner};
use super::recovery::{RecoveryOperation, RecoveryReconciler};
use super::registry::{ClusterRegistry, ClusterSummary, RegistryError};
use super::scheduler::{FirstFit, PlacementPolicy};

/// Shared state for the control plane API
#[derive(Clone)]
pub struct ControlPlaneState {
    pub registry: ClusterRegistry,
    pub reconciler: RecoveryReconciler,
    pub policy: Arc<dyn PlacementPolicy>,
    pub provisioner: Arc<dyn Provisioner>,
    pub pod_start_delay: Duration,
}

impl ControlPlaneState {
    pub fn new() -> Self {
        let registry = ClusterRegistry::new();
        let policy: Arc<dyn PlacementPolicy> = Arc::new(FirstFit);
        let reconciler = RecoveryReconciler::new(registry.clone(), policy.clone());
        Self {
            registry,
            reconciler,
            policy,
            provisioner: Arc::new(NoopProvisioner),
            pod_start_delay: Duration::from_secs(super::POD_START_DELAY_SECS),
        }
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }
}

impl Default for ControlPlaneState {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the control plane router
pub fn create_control_plane_router(state: ControlPlaneState) -> Router {
    Router::new()
        // Cluster status
        .route("/v1/status", get(cluster_status))
        // Nodes
        .route("/v1/nodes", get(list_nodes).post(register_node))
        .route("/v1/nodes/{id}", get(get_node).delete(remove_node))
        .route("/v1/nodes/{id}/heartbeat", post(node_heartbeat))
        .route("/v1/nodes/{id}/fail", post(simulate_failure))
        .route("/v1/nodes/{id}/drain", post(drain_node))
        .route("/v1/nodes/{id}/repair", post(repair_node))
        // Pods
        .route("/v1/pods", get(list_pods).post(schedule_pod))
        .route("/v1/pods/{id}", get(get_pod).delete(delete_pod))
        // Recovery
        .route("/v1/recovery", get(recovery_status))
        // Health check
        .route("/health", get(health_check))
        .with_state(state)
}

/// Map a registry error to its transport status code
fn status_for(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::NodeNotFound(_) | RegistryError::PodNotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::InvalidCapacity(_) => StatusCode::BAD_REQUEST,
        RegistryError::DuplicateNodeId(_)
        | RegistryError::DuplicatePodId(_)
        | RegistryError::InsufficientCapacity { .. }
        | RegistryError::NodeNotSchedulable { .. }
        | RegistryError::PodNotOnExpectedNode { .. }
        | RegistryError::NodeNotEmpty { .. } => StatusCode::CONFLICT,
        RegistryError::ResourceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Core counts arrive as `i64` so out-of-range requests can be echoed back
/// verbatim. Anything outside `1..=u32::MAX` is invalid, never truncated.
fn cores_from_wire(raw: i64) -> Result<u32, RegistryError> {
    match u32::try_from(raw) {
        Ok(cores) if cores > 0 => Ok(cores),
        _ => Err(RegistryError::InvalidCapacity(raw)),
    }
}

fn error_response(err: RegistryError) -> axum::response::Response {
    (
        status_for(&err),
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Health & status
// ============================================================================

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn cluster_status(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(state.registry.summary())
}

// ============================================================================
// Node endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterNodeRequest {
    #[serde(default)]
    node_id: Option<String>,
    total_cores: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterNodeResponse {
    node_id: String,
    state: super::node::NodeState,
    total_cores: u32,
}

async fn register_node(
    State(state): State<ControlPlaneState>,
    Json(req): Json<RegisterNodeRequest>,
) -> impl IntoResponse {
    let total_cores = match cores_from_wire(req.total_cores) {
        Ok(cores) => cores,
        Err(e) => return error_response(e),
    };

    let node = match state.registry.register_node(req.node_id, total_cores) {
        Ok(node) => node,
        Err(e) => return error_response(e),
    };

    // Provisioning is an external collaborator; a failure after the registry
    // entry was created rolls the entry back before surfacing the error.
    if let Err(e) = state.provisioner.provision(&node).await {
        error!(node = %node.id, error = %e, "provisioning failed, rolling back");
        if let Err(rollback) = state.registry.remove_node(&node.id) {
            warn!(node = %node.id, error = %rollback, "rollback failed");
        }
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: e.to_string(),
            }),
        )
            .into_response();
    }

    (
        StatusCode::CREATED,
        Json(RegisterNodeResponse {
            node_id: node.id.clone(),
            state: node.state,
            total_cores: node.total_cores,
        }),
    )
        .into_response()
}

async fn list_nodes(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(state.registry.list_nodes())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeDetail {
    #[serde(flatten)]
    node: Node,
    assigned_pods: Vec<Pod>,
}

async fn get_node(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get_node(&id) {
        Some(node) => {
            let assigned_pods = state.registry.pods_on_node(&id).unwrap_or_default();
            Json(NodeDetail {
                node,
                assigned_pods,
            })
            .into_response()
        }
        None => error_response(RegistryError::NodeNotFound(id)),
    }
}

async fn remove_node(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.remove_node(&id) {
        Ok(node) => {
            state.provisioner.deprovision(&node.id).await;
            Json(node).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRequest {
    #[serde(default)]
    pods: HashMap<String, PodPhase>,
}

#[derive(Serialize)]
struct HeartbeatAck {
    acknowledged: bool,
}

async fn node_heartbeat(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    match state.registry.record_heartbeat(&id, &req.pods) {
        Ok(()) => Json(HeartbeatAck { acknowledged: true }).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureResponse {
    operations: Vec<RecoveryOperation>,
    summary: ClusterSummary,
}

async fn simulate_failure(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.registry.mark_failed(&id) {
        return error_response(e);
    }
    warn!(node = %id, "failure injected");
    let operations = state.reconciler.recover_node(&id);
    Json(FailureResponse {
        operations,
        summary: state.registry.summary(),
    })
    .into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DrainResponse {
    evacuated: Vec<String>,
    operations: Vec<RecoveryOperation>,
}

async fn drain_node(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.registry.drain_node(&id) {
        return error_response(e);
    }
    let operations = state.reconciler.recover_node(&id);
    let evacuated = operations
        .iter()
        .filter(|op| op.to_node.is_some())
        .map(|op| op.pod_id.clone())
        .collect();
    Json(DrainResponse {
        evacuated,
        operations,
    })
    .into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RepairResponse {
    node_id: String,
    available_cores: u32,
    summary: ClusterSummary,
}

async fn repair_node(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.repair_node(&id) {
        Ok(node) => Json(RepairResponse {
            node_id: node.id,
            available_cores: node.available_cores,
            summary: state.registry.summary(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Pod endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulePodRequest {
    cpu_required: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SchedulePodResponse {
    pod_id: String,
    node_id: String,
    phase: PodPhase,
}

async fn schedule_pod(
    State(state): State<ControlPlaneState>,
    Json(req): Json<SchedulePodRequest>,
) -> impl IntoResponse {
    let cpu_required = match cores_from_wire(req.cpu_required) {
        Ok(cores) => cores,
        Err(e) => return error_response(e),
    };
    match state.registry.schedule_pod(cpu_required, &*state.policy) {
        Ok(pod) => {
            state
                .registry
                .spawn_pod_start(pod.id.clone(), state.pod_start_delay);
            (
                StatusCode::CREATED,
                Json(SchedulePodResponse {
                    pod_id: pod.id,
                    node_id: pod.node_id,
                    phase: pod.phase,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn list_pods(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(state.registry.list_pods())
}

async fn get_pod(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get_pod(&id) {
        Some(pod) => Json(pod).into_response(),
        None => error_response(RegistryError::PodNotFound(id)),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeletePodResponse {
    pod_id: String,
    node_id: String,
    released_cores: u32,
}

async fn delete_pod(
    State(state): State<ControlPlaneState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.remove_pod(&id) {
        Ok(pod) => Json(DeletePodResponse {
            pod_id: pod.id,
            node_id: pod.node_id,
            released_cores: pod.cpu_required,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Recovery endpoints
// ============================================================================

async fn recovery_status(State(state): State<ControlPlaneState>) -> impl IntoResponse {
    Json(state.reconciler.report(super::RECOVERY_REPORT_RECENT))
}
