//! freshgate CLI - maintenance commands for the local response cache

use clap::Parser;

mod cli;

use cli::args::GlobalOptions;
use cli::{CacheCommands, Cli, Commands, ConfigCommands};
use freshgate::error::Result;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(cli) {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "warn" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

fn run(cli: Cli) -> Result<()> {
    let opts = GlobalOptions::from_cli(&cli);

    match cli.command {
        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Status => cli::cache::status(&opts),
            CacheCommands::Clear => cli::cache::clear(&opts),
            CacheCommands::Prune => cli::cache::prune(&opts),
            CacheCommands::Path => cli::cache::path(&opts),
            CacheCommands::Invalidate { pattern, family } => {
                cli::cache::invalidate(&opts, &pattern, family)
            }
        },
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => cli::config::show(&opts),
            ConfigCommands::Init { force } => cli::config::init(&opts, force),
        },
        Commands::Version => {
            println!("freshgate version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
