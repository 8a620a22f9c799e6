use std::process;

use clap::Parser;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use minigrid::agent::{AgentConfig, HeartbeatAgent};
use minigrid::cli::{Args, Command};
use minigrid::cluster::{
    create_control_plane_router, spawn_health_monitor, ControlPlaneState, MonitorConfig,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    match args.command {
        Command::Serve {
            bind_addr,
            port,
            sweep_interval_secs,
            staleness_threshold_secs,
        } => {
            serve(
                bind_addr,
                port,
                MonitorConfig {
                    period_secs: sweep_interval_secs,
                    staleness_threshold_secs,
                },
            )
            .await
        }
        Command::Agent {
            control_plane_url,
            node_id,
            cores,
            interval_secs,
        } => run_agent(control_plane_url, node_id, cores, interval_secs).await,
    }
}

async fn serve(bind_addr: String, port: u16, monitor_config: MonitorConfig) {
    let state = ControlPlaneState::new();

    let monitor_shutdown = spawn_health_monitor(
        state.registry.clone(),
        state.reconciler.clone(),
        monitor_config,
    );

    let app = create_control_plane_router(state).layer(TraceLayer::new_for_http());
    let addr = format!("{}:{}", bind_addr, port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            process::exit(1);
        }
    };

    info!("Control plane listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /health              - Health check");
    info!("  GET  /v1/status           - Cluster summary");
    info!("  POST /v1/nodes            - Register a node");
    info!("  POST /v1/pods             - Schedule a pod");
    info!("  GET  /v1/recovery         - Recovery status");

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        let _ = monitor_shutdown.send(true);
        process::exit(1);
    }
}

async fn run_agent(
    control_plane_url: String,
    node_id: Option<String>,
    cores: Option<u32>,
    interval_secs: Option<u64>,
) {
    let node_id = node_id.unwrap_or_else(|| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "worker".to_string())
    });
    let cores = cores.unwrap_or_else(|| {
        let sys = sysinfo::System::new_all();
        sys.cpus().len().max(1) as u32
    });

    let mut config = AgentConfig::new(control_plane_url, node_id).with_cores(cores);
    if let Some(secs) = interval_secs {
        config = config.with_interval(secs);
    }

    let agent = match HeartbeatAgent::new(config) {
        Ok(agent) => agent,
        Err(e) => {
            error!("Failed to create agent: {}", e);
            process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down agent");
    let _ = shutdown_tx.send(true);
    let _ = handle.await;
}
