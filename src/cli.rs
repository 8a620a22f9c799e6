//! Command-line interface for minigrid

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cluster::{CONTROL_PLANE_PORT, HEALTH_SWEEP_INTERVAL_SECS, STALENESS_THRESHOLD_SECS};

/// Simulate a small compute cluster
#[derive(Debug, Parser)]
#[command(name = "minigrid", version, about)]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Load environment variables from a file
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the control plane: API server plus health monitor
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind_addr: String,

        /// Port to listen on
        #[arg(long, default_value_t = CONTROL_PLANE_PORT)]
        port: u16,

        /// Health sweep period in seconds
        #[arg(long, default_value_t = HEALTH_SWEEP_INTERVAL_SECS)]
        sweep_interval_secs: u64,

        /// Heartbeat age before a node counts as stale, in seconds
        #[arg(long, default_value_t = STALENESS_THRESHOLD_SECS)]
        staleness_threshold_secs: i64,
    },

    /// Run a simulated worker node agent
    Agent {
        /// Control plane URL
        #[arg(long, env = "MINIGRID_CONTROL_PLANE", default_value = "http://localhost:8181")]
        control_plane_url: String,

        /// Node identity (defaults to the machine hostname)
        #[arg(long)]
        node_id: Option<String>,

        /// Cores to register (defaults to the machine's core count)
        #[arg(long)]
        cores: Option<u32>,

        /// Heartbeat interval in seconds
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_defaults() {
        let args = Args::parse_from(["minigrid", "serve"]);
        match args.command {
            Command::Serve {
                port,
                sweep_interval_secs,
                staleness_threshold_secs,
                ..
            } => {
                assert_eq!(port, CONTROL_PLANE_PORT);
                assert_eq!(sweep_interval_secs, HEALTH_SWEEP_INTERVAL_SECS);
                assert_eq!(staleness_threshold_secs, STALENESS_THRESHOLD_SECS);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_agent_flags() {
        let args = Args::parse_from([
            "minigrid",
            "agent",
            "--node-id",
            "worker-1",
            "--cores",
            "8",
        ]);
        match args.command {
            Command::Agent { node_id, cores, .. } => {
                assert_eq!(node_id.as_deref(), Some("worker-1"));
                assert_eq!(cores, Some(8));
            }
            _ => panic!("expected agent"),
        }
    }
}
