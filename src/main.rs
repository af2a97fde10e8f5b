//! IP Tracking Agent for Zentinel
//!
//! Serves allow/block decisions over a Unix socket and runs the anomaly
//! scan on a schedule.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_agent_ip_tracking::protocol::handle_line;
use zentinel_agent_ip_tracking::{IpTrackingAgent, IpTrackingConfig};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-ip-tracking")]
#[command(author, version, about = "IP tracking and abuse detection agent for Zentinel")]
struct Args {
    /// Unix socket path for the agent server
    #[arg(short, long, default_value = "/tmp/zentinel-ip-tracking.sock")]
    socket: PathBuf,

    /// Path to configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to blocklist seed file, overriding the configured one
    #[arg(long)]
    blocklist: Option<PathBuf>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(json: bool, level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<IpTrackingConfig> {
    let Some(path) = path else {
        return Ok(IpTrackingConfig::default());
    };
    let content = std::fs::read_to_string(path)?;
    let config = if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, &args.log_level);

    let mut config = load_config(args.config.as_ref())?;
    if let Some(path) = args.blocklist {
        config.store.blocklist_path = Some(path);
    }

    let agent = Arc::new(IpTrackingAgent::from_config(config)?);

    let scanner_config = &agent.config().scanner;
    if scanner_config.enabled {
        info!(
            interval_seconds = scanner_config.interval_seconds,
            window_seconds = scanner_config.window_seconds,
            threshold = scanner_config.threshold,
            "Scheduling anomaly scan"
        );
        agent
            .scanner()
            .clone()
            .spawn_schedule(Duration::from_secs(scanner_config.interval_seconds.max(1)));
    }

    run_uds_server(args.socket, agent).await
}

/// Run the agent as a UDS server speaking line-delimited JSON.
async fn run_uds_server(socket_path: PathBuf, agent: Arc<IpTrackingAgent>) -> Result<()> {
    // Remove existing socket file if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), "UDS server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let agent = Arc::clone(&agent);

        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut writer = BufWriter::new(write_half);

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        tracing::debug!("Client disconnected");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read message");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let reply = handle_line(&agent, &line).await;
                let mut bytes = match serde_json::to_vec(&reply) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize reply");
                        continue;
                    }
                };
                bytes.push(b'\n');

                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::error!(error = %e, "Failed to write reply");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    tracing::error!(error = %e, "Failed to flush reply");
                    break;
                }
            }
        });
    }
}
