use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use region_sentinel::config::SAMPLE_CONFIG;
use region_sentinel::drill::run_primary_outage_drill;
use region_sentinel::integrations::StockCollaborators;
use region_sentinel::{ControlPlane, ControlPlaneConfig, LogChannel, NotificationChannel};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "region-sentinel")]
#[command(about = "Region health monitoring, failover control and alert escalation")]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults to $SENTINEL_CONFIG_FILE)
    #[arg(long, global = true, env = "SENTINEL_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control plane and run until interrupted
    Run,
    /// Validate configuration and print a diagnostic report
    Validate,
    /// Print a sample configuration file
    InitConfig {
        /// Write to this path instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Simulate a primary region outage and print the resulting transitions
    Drill {
        /// Number of health passes to run
        #[arg(long, default_value = "5")]
        passes: u32,
    },
}

fn init_logging(json: bool, default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Commands::InitConfig { output } = &cli.command {
        return match output {
            Some(path) => {
                std::fs::write(path, SAMPLE_CONFIG)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("✅ Sample configuration written to {}", path.display());
                Ok(())
            }
            None => {
                print!("{SAMPLE_CONFIG}");
                Ok(())
            }
        };
    }

    let config = match &cli.config {
        Some(path) => ControlPlaneConfig::load(Some(path.as_path()))?,
        None if matches!(cli.command, Commands::Run) => {
            return Err(anyhow::anyhow!(
                "`run` needs a configuration file; pass --config or set SENTINEL_CONFIG_FILE"
            ));
        }
        // validate and drill fall back to the sample topology
        None => {
            let mut config = ControlPlaneConfig::from_toml_str(SAMPLE_CONFIG)?;
            config.apply_env_overrides()?;
            config
        }
    };
    init_logging(cli.json, &config.log_level);

    match cli.command {
        Commands::Validate => {
            print!("{}", config.create_diagnostic_report());
            config.validate()
        }
        Commands::Drill { passes } => run_drill(config, passes).await,
        Commands::Run => run_control_plane(config).await,
        Commands::InitConfig { .. } => Ok(()),
    }
}

async fn run_drill(config: ControlPlaneConfig, passes: u32) -> Result<()> {
    let channels: Vec<Arc<dyn NotificationChannel>> = config
        .severity_channel_policy
        .referenced_channels()
        .into_iter()
        .map(|name| Arc::new(LogChannel::new(name)) as Arc<dyn NotificationChannel>)
        .collect();

    let report = run_primary_outage_drill(config, channels, passes).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_control_plane(config: ControlPlaneConfig) -> Result<()> {
    config.validate()?;
    let stock = StockCollaborators::from_config(&config)?;
    let plane = ControlPlane::new(config, stock.probes, stock.channels, stock.executor)?;

    plane.start().await;
    wait_for_shutdown().await;
    plane.shutdown().await;

    info!("Final status:\n{}", plane.status_json().await?);
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate signal handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
