mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::ConfigOverrides;

#[derive(Parser)]
#[command(
    name = "pieceport",
    version,
    about = "Move piece indices and deals from a legacy store to a destination store"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every piece index, every piece's deals, or verify one piece
    Migrate {
        /// `index`, `deal`, or a piece CID to verify
        subject: String,
        /// Path to migration YAML file
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        overrides: ConfigOverrides,
        /// Stop after the first piece that needed work
        #[arg(long)]
        single: bool,
    },
    /// Validate a migration config and print the effective settings
    CheckConfig {
        /// Path to migration YAML file
        config: Option<PathBuf>,
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Migrate {
            subject,
            config,
            overrides,
            single,
        } => commands::migrate::execute(&subject, config.as_deref(), &overrides, single).await,
        Commands::CheckConfig { config, overrides } => {
            commands::check_config::execute(config.as_deref(), &overrides)
        }
    }
}
