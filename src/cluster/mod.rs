//! # minigrid cluster engine
//!
//! A single-authority, in-memory model of a small compute cluster.
//!
//! ## Core resources
//!
//! - **Node**: a capacity-bearing worker that registers a fixed core count
//!   and stays live by heartbeating
//! - **Pod**: a workload reserving a fixed core allotment on exactly one node
//!
//! ## Components
//!
//! - [`ClusterRegistry`]: owns all node/pod state; every mutation is
//!   linearizable behind one lock
//! - [`PlacementPolicy`] / [`FirstFit`]: stateless placement decisions over
//!   registry snapshots
//! - [`RecoveryReconciler`] + [`RecoveryLog`]: relocates pods off
//!   non-schedulable nodes and records each attempt
//! - health monitor: periodic staleness sweep driving nodes unhealthy and
//!   invoking the reconciler
//! - control plane API: thin axum surface over the above
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  minigrid control plane                  │
//! │  ┌────────────┐  ┌───────────────┐  ┌────────────────┐  │
//! │  │ API server │  │ HealthMonitor │  │ ClusterRegistry│  │
//! │  │ :8181      │  │ (sweep timer) │  │  + RecoveryLog │  │
//! │  └────────────┘  └───────────────┘  └────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//!                            ▲ heartbeats
//!        ┌───────────────────┼───────────────────┐
//!  ┌───────────┐       ┌───────────┐       ┌───────────┐
//!  │  agent 1  │       │  agent 2  │       │  agent 3  │
//!  └───────────┘       └───────────┘       └───────────┘
//! ```

pub mod api;
pub mod monitor;
pub mod node;
pub mod pod;
pub mod provision;
pub mod recovery;
pub mod registry;
pub mod scheduler;

pub use api::{create_control_plane_router, ControlPlaneState};
pub use monitor::{run_sweep, spawn_health_monitor, MonitorConfig};
pub use node::{Node, NodeSnapshot, NodeState};
pub use pod::{Pod, PodPhase};
pub use provision::{NoopProvisioner, ProvisionError, Provisioner};
pub use recovery::{
    RecoveryLog, RecoveryOperation, RecoveryReconciler, RecoveryReport, RecoveryStatus,
};
pub use registry::{ClusterRegistry, ClusterSummary, RegistryError};
pub use scheduler::{FirstFit, PlacementPolicy};

/// Default control plane API port
pub const CONTROL_PLANE_PORT: u16 = 8181;

/// Default heartbeat interval for agents, in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default health sweep period, in seconds
pub const HEALTH_SWEEP_INTERVAL_SECS: u64 = 30;

/// Default maximum heartbeat age before a node counts as stale, in seconds
pub const STALENESS_THRESHOLD_SECS: i64 = 90;

/// Simulated pod start-up delay (pending → running), in seconds
pub const POD_START_DELAY_SECS: u64 = 2;

/// Simulated duration of one relocation, for remaining-time estimates
pub const RECOVERY_OP_SECS: u64 = 5;

/// Maximum entries held by the recovery log
pub const RECOVERY_LOG_CAPACITY: usize = 256;

/// Retention window for recovery log entries, in seconds
pub const RECOVERY_RETENTION_SECS: i64 = 3600;

/// How many recent operations the recovery status endpoint returns
pub const RECOVERY_REPORT_RECENT: usize = 50;
