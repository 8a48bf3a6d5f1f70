//! CLI command definitions and handlers

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod args;
pub mod cache;
pub mod config;
pub mod context;

pub use args::OutputFormat;
pub use context::CommandContext;

/// freshgate - inspect and maintain the local response cache
#[derive(Parser, Debug)]
#[command(name = "freshgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, json)
    #[arg(
        long,
        global = true,
        env = "FRESHGATE_FORMAT",
        default_value = "pretty",
        hide_env = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "FRESHGATE_CONFIG", hide_env = true)]
    pub config: Option<PathBuf>,

    /// Override the durable cache directory
    #[arg(long, global = true, env = "FRESHGATE_CACHE_DIR", hide_env = true)]
    pub cache_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true, env = "FRESHGATE_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the durable response cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Show or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Display version information
    Version,
}

/// Cache management subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Status,
    /// Clear all cached data
    Clear,
    /// Drop expired and unreadable entries
    Prune,
    /// Print cache directory path
    Path,
    /// Remove entries whose key matches a pattern
    #[command(after_help = "\
Examples:
  freshgate cache invalidate '^api_rooms'
  freshgate cache invalidate --family inventory")]
    Invalidate {
        /// Regular expression matched against cache keys
        pattern: String,

        /// Treat PATTERN as a resource name and remove its whole family
        #[arg(long)]
        family: bool,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a configuration file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_family_invalidation() {
        let cli = Cli::try_parse_from([
            "freshgate",
            "cache",
            "invalidate",
            "rooms",
            "--family",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Cache(CacheCommands::Invalidate { pattern, family }) => {
                assert_eq!(pattern, "rooms");
                assert!(family);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
