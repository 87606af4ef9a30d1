//! vrdeploy Agent Daemon
//!
//! The agent runs on managed hosts and keeps one outbound WebSocket to the
//! control server, over which it serves interactive terminal sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vd_agent::pty::PtyRunner;
use vd_agent::AgentState;
use vd_core::config::{self, AgentConfig};
use vd_core::{FileSecretStore, SecretStore, StaticSecret};

/// Time given to sessions to publish their end after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "vd-agent")]
#[command(about = "vrdeploy agent - serves remote terminals to the control server")]
#[command(version)]
struct Args {
    /// Control server pub/sub endpoint
    /// Example: wss://deploy.example.com/pubsub/agente
    #[arg(short, long)]
    server: Option<String>,

    /// Agent token (overrides the token file)
    #[arg(long, env = "VD_AGENT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Path to the agent token file
    #[arg(long)]
    token_path: Option<PathBuf>,

    /// Heartbeat interval in seconds
    #[arg(long)]
    heartbeat: Option<u64>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("vrdeploy Agent starting...");

    // Load configuration
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);

    let mut config = if config_path.exists() {
        config::load_config(&config_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", config_path, e);
            AgentConfig::default()
        })
    } else {
        AgentConfig::default()
    };

    // Apply command-line overrides
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(path) = args.token_path {
        config.token_path = path;
    }
    if let Some(secs) = args.heartbeat {
        config.heartbeat_interval = Duration::from_secs(secs);
    }
    config.validate().context("Invalid configuration")?;

    let secrets: Arc<dyn SecretStore> = match args.token {
        Some(token) => Arc::new(StaticSecret::new(token)),
        None => Arc::new(FileSecretStore::new(&config.token_path)),
    };
    let runner = Arc::new(PtyRunner::new(
        config.default_shell.clone(),
        config.default_env.clone(),
    ));

    tracing::info!("Connecting to control server at {}", config.server_url);
    let agent = AgentState::new(config, secrets, runner).await;

    tokio::select! {
        failure = agent.run() => {
            agent.shutdown();
            tracing::error!("Unable to stay connected to the control server: {}", failure);
            return Err(failure).context("Control server unreachable, exiting");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down...");
            agent.shutdown();
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }
    }

    Ok(())
}
