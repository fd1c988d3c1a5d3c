//! showdl CLI - maintenance tool for downloaded shows
//!
//! Works on the durable state of the show download manager: download
//! records, settings and the files under the download directory. Transfers
//! themselves belong to the transfer engine and are not driven from here.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// showdl - Show Download Manager
#[derive(Parser)]
#[command(name = "showdl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for showdl
    #[arg(long, env = "SHOWDL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// List shows with a downloaded recording
    Records,

    /// Forget the downloaded recording of a show
    Forget {
        /// Show identifier
        show: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Disk usage of downloaded shows
    Usage {
        /// Only report this show
        show: Option<String>,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Determine data directory
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("showdl"))
            .unwrap_or_else(|| PathBuf::from(".showdl"))
    });

    // Execute command
    match cli.command {
        Commands::Records => {
            let ctx = commands::Context::open(data_dir).await?;
            commands::list_records(&ctx, cli.output).await?
        }

        Commands::Forget { show, yes } => {
            let ctx = commands::Context::open(data_dir).await?;
            commands::forget_show(&ctx, &show, yes, cli.output).await?
        }

        Commands::Usage { show } => {
            let ctx = commands::Context::open(data_dir).await?;
            commands::disk_usage(&ctx, show, cli.output).await?
        }

        Commands::Config { action } => {
            let ctx = commands::Context::open(data_dir).await?;
            commands::config_action(&ctx, action, cli.output).await?
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "showdl", &mut std::io::stdout());
        }
    }

    Ok(())
}
