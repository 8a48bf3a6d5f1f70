//! Cache management commands

use colored::Colorize;
use regex::Regex;

use freshgate::cache::key::family_pattern;
use freshgate::cache::storage::survey;
use freshgate::clock::{Clock, SystemClock};
use freshgate::error::Result;

use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, OutputFormat};

/// Show cache status/statistics
pub fn status(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let stats = survey(ctx.durable.as_ref(), SystemClock.now())?;
    let path = ctx.durable.path().display().to_string();

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "total_entries": stats.total_records,
                "valid_entries": stats.valid_records,
                "expired_entries": stats.expired_records,
                "malformed_entries": stats.malformed_records,
                "total_size_bytes": stats.total_size_bytes,
                "total_size_human": format_size(stats.total_size_bytes),
                "oldest_entry": stats.oldest_entry,
                "newest_entry": stats.newest_entry,
                "max_size": ctx.config.cache.max_size,
                "path": path,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Pretty => {
            println!("{}", "Cache Status".bold());
            println!("────────────────────────────────────────");
            println!("Location:       {}", path.cyan());
            println!("Valid entries:  {}", stats.valid_records);
            println!("Expired:        {}", stats.expired_records);
            if stats.malformed_records > 0 {
                println!("Unreadable:     {}", stats.malformed_records.to_string().yellow());
            }
            println!("Capacity:       {}", ctx.config.cache.max_size);
            println!("Total size:     {}", format_size(stats.total_size_bytes));

            if let Some(oldest) = stats.oldest_entry {
                println!("Oldest entry:   {}", local_time(oldest));
            }
            if let Some(newest) = stats.newest_entry {
                println!("Newest entry:   {}", local_time(newest));
            }
        }
    }

    Ok(())
}

/// Clear all cache entries
pub fn clear(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let stats = ctx.durable.clear_all()?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "entries_removed": stats.entries_removed,
                "success": true,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Pretty => {
            if stats.entries_removed > 0 {
                println!("Cleared {} cache entries", stats.entries_removed);
            } else {
                println!("Cache was already empty");
            }
        }
    }

    Ok(())
}

/// Drop expired and malformed entries from the durable cache
pub fn prune(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let report = ctx.cache_store().load_from_durable();

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "expired_removed": report.expired,
                "malformed_removed": report.malformed,
                "remaining": report.restored,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Pretty => {
            let removed = report.expired + report.malformed;
            if removed > 0 {
                println!(
                    "Removed {} entries ({} expired, {} unreadable), {} remaining",
                    removed, report.expired, report.malformed, report.restored
                );
            } else {
                println!("Nothing to prune, {} entries remaining", report.restored);
            }
        }
    }

    Ok(())
}

/// Remove entries whose key matches `pattern` (or the family named by it)
pub fn invalidate(opts: &GlobalOptions, pattern: &str, family: bool) -> Result<()> {
    let source = if family {
        family_pattern(pattern)
    } else {
        pattern.to_string()
    };
    let pattern = Regex::new(&source)?;

    let ctx = CommandContext::new(opts)?;
    let store = ctx.cache_store();
    store.load_from_durable();
    let removed = store.invalidate_pattern(&pattern);

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "pattern": source,
                "entries_removed": removed,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Pretty => {
            println!("Invalidated {} entries matching {}", removed, source.cyan());
        }
    }

    Ok(())
}

/// Show cache path
pub fn path(opts: &GlobalOptions) -> Result<()> {
    let path = CommandContext::resolve_cache_dir(opts)?;
    println!("{}", path.display());
    Ok(())
}

fn local_time(at: chrono::DateTime<chrono::Utc>) -> String {
    at.with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// Format bytes as human-readable size
fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
