//! Command execution context
//!
//! Loads the configuration and opens the durable cache once, so each
//! command handler starts from a ready-to-use store.

use std::path::PathBuf;
use std::sync::Arc;

use freshgate::cache::storage::SqliteStore;
use freshgate::cache::CacheStore;
use freshgate::config::Config;
use freshgate::error::Result;

use crate::cli::OutputFormat;
use crate::cli::args::GlobalOptions;

pub struct CommandContext {
    /// Effective configuration (defaults when no file exists)
    pub config: Config,
    /// Durable cache database
    pub durable: Arc<SqliteStore>,
    /// Output format preference
    pub format: OutputFormat,
}

impl CommandContext {
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let config = Config::load_or_default(opts.config_ref())?;
        let cache_dir = Self::resolve_cache_dir(opts)?;
        let durable = SqliteStore::open_at(&cache_dir)?;
        log::debug!("Opened durable cache at {}", durable.path().display());

        Ok(Self {
            config,
            durable: Arc::new(durable),
            format: opts.format,
        })
    }

    /// `--cache-dir` if given, else the platform cache directory
    pub fn resolve_cache_dir(opts: &GlobalOptions) -> Result<PathBuf> {
        match opts.cache_dir_ref() {
            Some(dir) => Ok(dir.to_path_buf()),
            None => Ok(SqliteStore::cache_dir()?),
        }
    }

    /// In-memory store backed by the durable cache, not yet hydrated
    pub fn cache_store(&self) -> CacheStore {
        self.config
            .cache
            .builder()
            .durable(self.durable.clone())
            .build()
    }
}
