use std::path::PathBuf;

use clap::Parser;

use crate::Commands;

/// Main CLI application arguments and command structure
#[derive(Parser)]
#[clap(
    name = "purenote",
    version,
    about = "A small local notepad with autosave and cross-instance sync"
)]
pub struct Cli {
    /// Path to the configuration file
    #[clap(short = 'c', long, value_parser)]
    pub config: Option<PathBuf>,

    /// Path to the store file (overrides the configuration)
    #[clap(short = 's', long, value_parser)]
    pub store: Option<PathBuf>,

    /// Verbose output mode
    #[clap(short, long)]
    pub verbose: bool,

    /// Subcommands for the purenote application
    #[clap(subcommand)]
    pub command: Commands,
}
