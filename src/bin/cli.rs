//! CLI for controller operations

use clap::{Parser, Subcommand};
use minifs::common::format_bytes;
use minifs::ControllerClient;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "minifs")]
#[command(about = "minifs replicated file store CLI")]
#[command(version)]
struct Cli {
    /// Controller address
    #[arg(long, default_value = "127.0.0.1:12345")]
    controller: String,

    /// Seconds to wait for each controller reply
    #[arg(long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored files
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which node serves a file
    Load {
        /// File name
        file: String,
    },

    /// Show which node serves a file and a fallback node for it
    ///
    /// The controller only remembers the last node it handed out per
    /// connection, so the load and the reload share one connection.
    Reload {
        /// File name
        file: String,
    },

    /// Remove a file from every node
    Remove {
        /// File name
        file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut client = ControllerClient::connect(&cli.controller)
        .await?
        .with_timeout(Duration::from_secs(cli.timeout));

    match cli.command {
        Commands::List { json } => {
            let files = client.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                println!("{} file(s):", files.len());
                for file in files {
                    println!("  {}", file);
                }
            }
        }

        Commands::Load { file } => {
            let (port, size) = client.load(&file).await?;
            println!("{}: port {} ({})", file, port, format_bytes(size));
        }

        Commands::Reload { file } => {
            let (first, (port, size)) = client.load_elsewhere(&file).await?;
            println!("{}: port {} ({})", file, first, format_bytes(size));
            println!("{}: fallback port {}", file, port);
        }

        Commands::Remove { file } => {
            client.remove(&file).await?;
            println!("Removed {}", file);
        }
    }

    Ok(())
}
