use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Args;
use tracing::debug;

use crate::{
    config::Config,
    store::{FileStore, KeyValueStore, MemoryStore},
};

#[derive(Debug, Args)]
pub(crate) struct GlobalOpts {
    /// Directory holding the per-origin stores
    ///
    /// Each origin gets its own subdirectory, so records written for one
    /// origin are never visible to another.
    #[arg(long, env = "CO_GUARD_STORE_DIR", default_value = ".co-guard")]
    pub(crate) store_dir: PathBuf,

    /// Keep all records in memory for this invocation only
    #[arg(long, env = "CO_GUARD_EPHEMERAL")]
    pub(crate) ephemeral: bool,

    /// Enforcement configuration file (YAML)
    ///
    /// Any field left out keeps its default value.
    #[arg(short, long, env = "CO_GUARD_CONFIG")]
    pub(crate) config: Option<PathBuf>,
}

impl GlobalOpts {
    pub(crate) fn load_config(&self) -> anyhow::Result<Config> {
        let config = Config::load(self.config.as_deref()).with_context(|| {
            format!(
                "Failed to load configuration{}",
                self.config
                    .as_ref()
                    .map(|path| format!(" from {}", path.display()))
                    .unwrap_or_default()
            )
        })?;

        debug!(?config, "Loaded enforcement configuration");
        Ok(config)
    }

    pub(crate) fn open_store(&self, origin: &str) -> anyhow::Result<Arc<dyn KeyValueStore>> {
        if self.ephemeral {
            debug!(origin, "Using in-memory store");
            return Ok(Arc::new(MemoryStore::new()));
        }

        Ok(Arc::new(FileStore::open(&self.store_dir, origin)?))
    }
}
