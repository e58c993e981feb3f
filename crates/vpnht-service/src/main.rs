#![deny(unsafe_code)]

//! `vpnht-service`: the VPNHT helper daemon.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use vpnht_config::{ServiceConfig, TransportMode};
use vpnht_core::ipc::TransportKind;
use vpnht_core::{BoundAddress, ControlClient, Daemon};

/// VPNHT helper service.
#[derive(Parser, Debug)]
#[command(name = "vpnht-service", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file. Defaults are used when it does not exist.
    #[arg(short, long, default_value = "/etc/vpnht/service.toml")]
    config: PathBuf,

    /// Development mode (also accepted as `-dev`).
    #[arg(long)]
    dev: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Override the control socket path.
    #[arg(long, value_name = "PATH")]
    socket: Option<String>,

    /// Override the loopback TCP port.
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Override the transport: auto, unix or tcp.
    #[arg(long, value_name = "MODE")]
    transport: Option<TransportMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the service in the foreground (default).
    Run,

    /// Query a running service's health.
    Status,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args()));

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if tracing::dispatcher::has_been_set() {
                error!(error = %format!("{e:#}"), "vpnht service failed");
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Accept the single-dash `-dev` spelling used by the installer scripts.
fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| if arg == "-dev" { "--dev".to_string() } else { arg })
        .collect()
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(config, cli.verbose).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Config { show } => cmd_config(&cli.config, &config, show),
    }
}

async fn cmd_run(config: ServiceConfig, verbose: u8) -> Result<()> {
    vpnht_core::logging::init(&config, verbose)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let config = Arc::new(config);
    let (collaborators, _sessions) = vpnht_core::builtin::collaborators(&config)
        .context("failed to build health pinger")?;

    let report = Daemon::new(config, collaborators).run().await?;
    if report.is_clean() {
        info!(signal = %report.signal, "vpnht service exited cleanly");
    } else {
        for (step, outcome) in report.steps.iter().filter(|(_, o)| !o.is_done()) {
            warn!(step = ?step, outcome = %outcome, "Teardown step recovered");
        }
    }
    Ok(())
}

async fn cmd_status(config: &ServiceConfig) -> Result<()> {
    let kind = TransportKind::select(&config.transport)?;
    let client = ControlClient::new(BoundAddress::from(&kind));
    let health = client
        .health()
        .await
        .with_context(|| format!("no response from {}", client.address()))?;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

fn cmd_config(path: &Path, config: &ServiceConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("TOML error")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", path.display());
    }
    Ok(())
}

/// Load the file (or defaults), apply command-line overrides, re-validate.
async fn resolve_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = if cli.config.exists() {
        ServiceConfig::load(&cli.config)
            .await
            .with_context(|| format!("invalid config {}", cli.config.display()))?
    } else {
        ServiceConfig::default()
    };
    apply_overrides(&mut config, cli);
    config.validate().context("invalid command-line override")?;
    Ok(config)
}

fn apply_overrides(config: &mut ServiceConfig, cli: &Cli) {
    if cli.dev {
        config.service.development = true;
    }
    if let Some(socket) = &cli.socket {
        config.transport.socket_path = socket.clone();
    }
    if let Some(port) = cli.port {
        config.transport.tcp_port = port;
    }
    if let Some(mode) = cli.transport {
        config.transport.mode = mode;
    }
}
