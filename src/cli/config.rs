//! Configuration file commands

use colored::Colorize;

use freshgate::config::Config;
use freshgate::error::{ConfigError, Result};

use crate::cli::OutputFormat;
use crate::cli::args::GlobalOptions;

/// Print the effective configuration and where it came from
pub fn show(opts: &GlobalOptions) -> Result<()> {
    let path = match opts.config_ref() {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    let config = Config::load_or_default(Some(&path))?;

    match opts.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "path": path.display().to_string(),
                "exists": path.exists(),
                "config": config,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Pretty => {
            let origin = if path.exists() {
                path.display().to_string().cyan().to_string()
            } else {
                format!("{} {}", path.display(), "(not found, using defaults)".dimmed())
            };
            println!("Config file: {}\n", origin);
            let yaml =
                serde_yaml::to_string(&config).map_err(|e| ConfigError::SaveError(e.to_string()))?;
            print!("{}", yaml);
        }
    }

    Ok(())
}

/// Write a configuration file holding the defaults
pub fn init(opts: &GlobalOptions, force: bool) -> Result<()> {
    let path = match opts.config_ref() {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };

    if path.exists() && !force {
        return Err(ConfigError::Invalid(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ))
        .into());
    }

    Config::default().save_to(&path)?;

    match opts.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "path": path.display().to_string(),
                "created": true,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Pretty => {
            println!("{} {}", "Created".green(), path.display());
        }
    }

    Ok(())
}
