// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "watercam")]
#[command(about = "Record camera video with an animated watermark composited on the GPU")]
#[command(version = watercam::constants::app_version())]
struct Cli {
    /// Configuration file (default: ~/.config/watercam/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a watermarked video
    Record(cli::RecordArgs),

    /// List available H.264 encoders
    Encoders,

    /// Print the effective configuration
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=watercam=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Record(args) => cli::record(args, config_path),
        Commands::Encoders => cli::list_encoders(),
        Commands::Config { write } => cli::show_config(config_path, write),
    }
}
