use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tether",
    about = "Tether -- inspect and exercise object-graph stores",
    version,
)]
pub struct Cli {
    /// SQLite database file
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List stored top-level records
    Entities,
    /// Show the raw rows of one entity
    Show(ShowArgs),
    /// Store a small cyclic demo graph
    Demo,
    /// Reload every record and print its fields
    Reload,
}

#[derive(Args)]
pub struct ShowArgs {
    pub id: u64,
}
