// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "webcam-hub")]
#[command(about = "Inspect webcams, watch hot-plug events and detect motion")]
#[command(version)]
struct Cli {
    /// Also expose the images of this directory as cameras
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Number of synthetic test pattern cameras
    #[arg(long, global = true, default_value = "1")]
    cameras: usize,

    /// Configuration file (default: ~/.config/webcam-hub/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Save one frame as PNG
    Snapshot {
        /// Camera index to use (from 'webcam-hub list')
        #[arg(short, long, default_value = "0")]
        camera: usize,

        /// Output file path (default: ~/Pictures/webcam-hub/snapshot_TIMESTAMP.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print cameras appearing and disappearing until Ctrl-C
    Watch,

    /// Print motion events until Ctrl-C
    Motion {
        /// Camera index to use (from 'webcam-hub list')
        #[arg(short, long, default_value = "0")]
        camera: usize,
    },

    /// Print the effective configuration
    Config {
        /// Write it to the configuration file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=webcam_hub=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let args = Cli::parse();
    let context = cli::Context::new(args.config, args.dir, args.cameras)?;

    match args.command {
        Commands::List => cli::list_cameras(&context),
        Commands::Snapshot { camera, output } => cli::take_snapshot(&context, camera, output),
        Commands::Watch => cli::watch(&context),
        Commands::Motion { camera } => cli::detect_motion(&context, camera),
        Commands::Config { save } => cli::show_config(&context, save),
    }
}
