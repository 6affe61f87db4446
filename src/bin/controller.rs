//! Controller binary

use clap::{Parser, Subcommand};
use minifs::{Config, Controller};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minifs-controller")]
#[command(about = "minifs replicated file store controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start controller server
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (overrides the configured host)
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Replication factor
        #[arg(long)]
        replicas: Option<usize>,

        /// Remove acknowledgment and rebalance probe timeout
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Seconds between rebalance cycles
        #[arg(long)]
        rebalance_period: Option<u64>,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            replicas,
            timeout_ms,
            rebalance_period,
            config,
        } => {
            // Load config from file and environment, then apply CLI overrides
            let mut config = Config::load(config.as_deref())?;
            if let Some(bind) = bind {
                config.bind_addr = SocketAddr::new(bind, config.bind_addr.port());
            }
            if let Some(port) = port {
                config.bind_addr.set_port(port);
            }
            if let Some(replicas) = replicas {
                config.replication_factor = replicas;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.timeout_ms = timeout_ms;
            }
            if let Some(period) = rebalance_period {
                config.rebalance_period_secs = period;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let controller = Controller::new(config);
            tokio::select! {
                res = controller.serve() => res?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down controller");
                }
            }
        }
    }

    Ok(())
}
