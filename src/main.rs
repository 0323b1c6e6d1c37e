use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use pluginsd::commands;
use pluginsd::config::{self, AgentConfig, Settings};
use pluginsd::logging;
use pluginsd::plugin::{DiscoveryScanner, ShellSpawner};
use pluginsd::state::SupervisorState;
use pluginsd::storage::MemoryStore;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "pluginsd")]
#[command(about = "Runs external collector plugins and ingests the metrics they print", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (TOML/YAML/JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Supervise plugins until interrupted (default)
    Run,
    /// List plugins and the command lines they would run with
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => config::load_from_env_or_file().context("Failed to load configuration")?,
    };
    let settings = Settings::from_store(&config).context("Invalid configuration")?;

    let _log_guard = logging::init(&settings.logging, args.debug)?;
    match &args.config {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Configuration loaded from default locations"),
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Check { json } => {
            commands::run_plugin_check(&config, json)?;
            Ok(())
        }
        Command::Run => run(config, settings).await,
    }
}

async fn run(config: AgentConfig, settings: Settings) -> anyhow::Result<()> {
    info!("Starting pluginsd");
    info!(
        "Plugins directory: {} (checked every {}s)",
        settings.plugins.directory.display(),
        settings.plugins.check_every
    );
    if settings.plugins.extensions {
        info!("Handshake extensions enabled");
    }

    let (state, _shutdown_rx) = SupervisorState::new();
    let scanner = DiscoveryScanner::new(
        state.clone(),
        Arc::new(config),
        Arc::new(ShellSpawner::new()),
        MemoryStore::new(),
    );
    let scanner_handle = tokio::spawn(scanner.run());

    shutdown_signal().await;

    info!("Shutting down pluginsd");
    state.shutdown(SHUTDOWN_TIMEOUT).await;

    match tokio::time::timeout(Duration::from_secs(1), scanner_handle).await {
        Ok(Ok(())) => info!("Graceful shutdown completed"),
        Ok(Err(e)) => error!("Plugin scanner failed: {}", e),
        Err(_) => error!("Plugin scanner did not stop in time"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
