//! Server entry point for the multi-agent orchestration runtime

use anyhow::Context;
use clap::Parser;
use kolosal_agents::config::{ENV_CONFIG, ENV_LOG_LEVEL, ENV_PORT, SystemConfig};
use kolosal_agents::runtime::AgentRuntime;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Exit code for configuration or bind failures
const EXIT_STARTUP_FAILURE: u8 = 1;
/// Exit code for unrecoverable runtime failures
const EXIT_RUNTIME_FAILURE: u8 = 2;
/// Exit code when interrupted by a signal
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "kolosal-agents", about = "Multi-agent orchestration runtime", version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Management API port; overrides env and the configuration file
    #[arg(long, env = ENV_PORT)]
    port: Option<u16>,

    /// Log level; overrides env and the configuration file
    #[arg(long, env = ENV_LOG_LEVEL)]
    log_level: Option<String>,
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> anyhow::Result<SystemConfig> {
    let mut config = match &cli.config {
        Some(path) => SystemConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SystemConfig::default(),
    };
    if let Some(port) = cli.port {
        config.system.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.system.log_level = level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("startup failure: {e:#}");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    init_logging(&config.system.log_level);
    info!("starting multi-agent orchestration runtime");
    if cli.config.is_none() {
        warn!("no configuration file given, starting with an empty agent population");
    }

    let runtime = AgentRuntime::new(config, cli.config.clone());
    match runtime.start().await {
        Ok((addr, report)) => {
            info!(
                %addr,
                created = report.created,
                started = report.started,
                failed = report.failures.len(),
                "runtime started"
            );
        }
        Err(e) => {
            error!("startup failure: {e}");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("interrupt received, shutting down");
            runtime.shutdown().await;
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            error!("failed to listen for shutdown signal: {e}");
            runtime.shutdown().await;
            ExitCode::from(EXIT_RUNTIME_FAILURE)
        }
    }
}
