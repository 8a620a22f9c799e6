//! Node provisioning seam
//!
//! Creating the actual execution sandbox for a newly registered node is an
//! external collaborator. The registration path inserts the registry entry
//! first and rolls it back if provisioning fails, so a half-registered node
//! never lingers.

use async_trait::async_trait;
use thiserror::Error;

use super::node::Node;

/// Errors surfaced by a provisioner
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("sandbox provisioning failed for node '{node}': {reason}")]
    Sandbox { node: String, reason: String },
}

/// Provisions and tears down the execution sandbox backing a node.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the sandbox for a freshly registered node.
    async fn provision(&self, node: &Node) -> Result<(), ProvisionError>;

    /// Best-effort teardown when a node is removed.
    async fn deprovision(&self, node_id: &str);
}

/// Provisioner for the simulated cluster: every node gets a sandbox for free.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn provision(&self, _node: &Node) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn deprovision(&self, _node_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_provisioner_always_succeeds() {
        let node = Node::new("n1", 4);
        assert!(NoopProvisioner.provision(&node).await.is_ok());
        NoopProvisioner.deprovision("n1").await;
    }
}
