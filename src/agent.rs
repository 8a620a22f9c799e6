//! Heartbeat agent for worker nodes
//!
//! A simulated worker process: it registers its node with the control plane,
//! then sends heartbeats on its own timer. Each heartbeat attempt retries
//! with doubling backoff from a base delay, capped at a maximum delay, and
//! is abandoned after a fixed attempt count; failures stay local to the
//! agent. Staleness is detected solely by the control plane's own clock, so
//! the two failure-detection paths never wait on each other. On shutdown the
//! agent issues a best-effort deregistration with a bounded timeout.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cluster::{Pod, PodPhase, HEARTBEAT_INTERVAL_SECS};

/// Configuration for the heartbeat agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Control plane URL (e.g., "http://localhost:8181")
    pub control_plane_url: String,

    /// Identity of the node this agent represents
    pub node_id: String,

    /// Cores the node registers with
    pub total_cores: u32,

    /// Heartbeat interval in seconds
    pub interval_secs: u64,

    /// First retry delay after a failed attempt
    pub base_backoff: Duration,

    /// Retry delay ceiling
    pub max_backoff: Duration,

    /// Attempts per heartbeat before abandoning it
    pub max_attempts: u32,

    /// Budget for the shutdown deregistration call
    pub deregister_timeout: Duration,
}

impl AgentConfig {
    pub fn new(control_plane_url: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            control_plane_url: control_plane_url.into(),
            node_id: node_id.into(),
            total_cores: 1,
            interval_secs: HEARTBEAT_INTERVAL_SECS,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            max_attempts: 5,
            deregister_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_cores(mut self, cores: u32) -> Self {
        self.total_cores = cores;
        self
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }
}

/// Errors local to the heartbeat agent
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("heartbeat abandoned after {attempts} attempts")]
    Abandoned { attempts: u32 },
}

/// Heartbeat agent that runs as a background task
pub struct HeartbeatAgent {
    config: AgentConfig,
    http_client: Client,
}

impl HeartbeatAgent {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Run the agent loop until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            node = %self.config.node_id,
            control_plane = %self.config.control_plane_url,
            interval_secs = self.config.interval_secs,
            "starting heartbeat agent"
        );

        if let Err(e) = self.register().await {
            error!(node = %self.config.node_id, error = %e, "registration failed, exiting");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_secs);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.send_heartbeat_with_retry().await {
                        Ok(()) => debug!(node = %self.config.node_id, "heartbeat sent"),
                        Err(e) => warn!(node = %self.config.node_id, error = %e, "heartbeat abandoned"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(node = %self.config.node_id, "agent shutting down");
                        self.deregister().await;
                        break;
                    }
                }
            }
        }
    }

    /// Register this agent's node. An already-registered id is fine: the
    /// agent may simply be restarting.
    async fn register(&self) -> Result<(), AgentError> {
        let url = format!("{}/v1/nodes", self.config.control_plane_url);
        let body = json!({
            "nodeId": self.config.node_id,
            "totalCores": self.config.total_cores,
        });

        let response = self.http_client.post(&url).json(&body).send().await?;
        if response.status().is_success() || response.status() == reqwest::StatusCode::CONFLICT {
            info!(node = %self.config.node_id, cores = self.config.total_cores, "node registered");
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            Err(AgentError::ServerError { status, message })
        }
    }

    /// One heartbeat with bounded doubling backoff between attempts.
    async fn send_heartbeat_with_retry(&self) -> Result<(), AgentError> {
        let mut backoff = self.config.base_backoff;
        for attempt in 1..=self.config.max_attempts {
            match self.send_heartbeat().await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(node = %self.config.node_id, attempt, "heartbeat recovered");
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        node = %self.config.node_id,
                        attempt,
                        error = %e,
                        "heartbeat attempt failed"
                    );
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff, self.config.max_backoff);
                    }
                }
            }
        }
        Err(AgentError::Abandoned {
            attempts: self.config.max_attempts,
        })
    }

    async fn send_heartbeat(&self) -> Result<(), AgentError> {
        let pods = self.report_pods().await;
        let url = format!(
            "{}/v1/nodes/{}/heartbeat",
            self.config.control_plane_url, self.config.node_id
        );

        let response = self
            .http_client
            .post(&url)
            .json(&json!({ "pods": pods }))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            Err(AgentError::ServerError { status, message })
        }
    }

    /// The simulated workload report: every pod assigned to this node is
    /// confirmed running. Falls back to an empty report if the lookup fails;
    /// the heartbeat itself still refreshes liveness.
    async fn report_pods(&self) -> HashMap<String, PodPhase> {
        let url = format!(
            "{}/v1/nodes/{}",
            self.config.control_plane_url, self.config.node_id
        );
        let assigned: Vec<Pod> = match self.http_client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|detail| {
                    serde_json::from_value(detail.get("assignedPods")?.clone()).ok()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        assigned
            .into_iter()
            .map(|pod| (pod.id, PodPhase::Running))
            .collect()
    }

    /// Best-effort deregistration; bounded, never retried.
    async fn deregister(&self) {
        let url = format!(
            "{}/v1/nodes/{}",
            self.config.control_plane_url, self.config.node_id
        );
        let result = self
            .http_client
            .delete(&url)
            .timeout(self.config.deregister_timeout)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                info!(node = %self.config.node_id, "node deregistered")
            }
            Ok(resp) => warn!(
                node = %self.config.node_id,
                status = resp.status().as_u16(),
                "deregistration refused"
            ),
            Err(e) => warn!(node = %self.config.node_id, error = %e, "deregistration failed"),
        }
    }
}

/// Double the delay, capped.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Spawn the agent as a background task.
///
/// Returns a shutdown sender; send `true` to stop the loop (the agent
/// deregisters before exiting).
pub fn spawn_agent(config: AgentConfig) -> Result<watch::Sender<bool>, AgentError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agent = HeartbeatAgent::new(config)?;
    tokio::spawn(async move {
        agent.run(shutdown_rx).await;
    });
    Ok(shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_builder() {
        let config = AgentConfig::new("http://localhost:8181", "worker-1")
            .with_cores(8)
            .with_interval(60);

        assert_eq!(config.control_plane_url, "http://localhost:8181");
        assert_eq!(config.node_id, "worker-1");
        assert_eq!(config.total_cores, 8);
        assert_eq!(config.interval_secs, 60);
    }

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::new("http://localhost:8181", "worker-1");
        assert_eq!(config.interval_secs, HEARTBEAT_INTERVAL_SECS);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_backoff, Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let max = Duration::from_secs(8);
        let mut delay = Duration::from_millis(500);
        let mut schedule = Vec::new();
        for _ in 0..6 {
            schedule.push(delay);
            delay = next_backoff(delay, max);
        }
        assert_eq!(
            schedule,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(8),
            ]
        );
    }
}
