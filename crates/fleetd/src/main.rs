//! fleetd: the fleetgrid daemon.
//!
//! Single binary that assembles the placement control plane:
//! - Region tree (from fleet.toml)
//! - Node registry (static bindings from fleet.toml)
//! - Container engine client (simulated in standalone mode)
//! - Fleet controller + reconcile loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd run --config fleet.toml --port 8443
//! fleetd check --config fleet.toml
//! ```

mod standalone;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use fleetgrid_core::FleetConfig;

const DEFAULT_LOG_FILTER: &str = "info,fleetd=debug,fleetgrid=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetgrid placement daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and API server (single process, simulated engine).
    Run {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Reconcile interval in seconds; overrides `[reconcile]`.
        #[arg(long)]
        reconcile_interval: Option<u64>,
    },
    /// Validate a fleet.toml and print its region tree.
    Check {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            port,
            reconcile_interval,
        } => {
            let mut fleet = FleetConfig::from_file(&config)?;
            if let Some(secs) = reconcile_interval {
                if secs == 0 {
                    anyhow::bail!("--reconcile-interval must be greater than zero");
                }
                fleet.reconcile.interval_secs = secs;
            }
            standalone::run_standalone(fleet, port).await
        }
        Command::Check { config } => {
            let fleet = FleetConfig::from_file(&config)?;
            print!("{}", standalone::check_report(&fleet)?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
