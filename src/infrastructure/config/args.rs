use super::cache_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments of the maintenance binary.
#[derive(Debug, Parser)]
#[command(
    name = "texcache",
    version,
    about = "Maintenance tool for the texcache image disk cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory, overriding the configuration file.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Action to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Maintenance actions.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Remove cached images fetched longer ago than the given age.
    Purge {
        /// Hours of age.
        #[arg(long, default_value_t = 0)]
        hours: u64,
        /// Minutes of age.
        #[arg(long, default_value_t = 0)]
        minutes: u64,
        /// Seconds of age.
        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },
    /// List cached images with their age.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Download an image into the disk cache.
    Fetch {
        /// Base URL of the host.
        url: String,
        /// Request path on the host.
        path: String,
        /// Cache id to store the image under.
        id: String,
    },
}
