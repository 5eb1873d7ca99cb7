mod config_cmd;
mod host;
mod load_cmd;
mod slot_cmd;
mod terminal_output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use modhost_config::{config_dir, config_file_path, load_and_prepare};

#[derive(Parser)]
#[command(name = "modhost")]
#[command(about = "ModHost: load tenant modules and inspect slot composition")]
#[command(version)]
struct Cli {
    /// Config file (default: $MODHOST_CONFIG_DIR/config.yaml or ~/.modhost/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every module in a catalog and report the outcome
    Load {
        /// Catalog file (JSON array of module descriptors)
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load a catalog, then compose and render one slot
    Slot {
        /// Slot name, e.g. context-panel
        name: String,
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Entity type of the current selection
        #[arg(long)]
        entity_type: Option<String>,
        /// Active layer; repeatable
        #[arg(long = "layer")]
        layers: Vec<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.unwrap_or_else(|| config_file_path(&config_dir()));
    let config = load_and_prepare(&path).await?;
    modhost_logging::init_logger(config.log_dir(), config.log_level());
    debug!(path = %path.display(), "Configuration loaded");

    match cli.command {
        Commands::Load { catalog, json } => load_cmd::run(&config, catalog, json).await,
        Commands::Slot { name, catalog, entity_type, layers } => {
            slot_cmd::run(&config, catalog, &name, entity_type, layers).await
        }
        Commands::Config => config_cmd::run(&config),
    }
}
