// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand implementations

pub mod ask;
pub mod load;
pub mod search;
pub mod status;

use anyhow::{Context as _, Result};
use std::path::PathBuf;
use tracing::debug;

use crate::cli::OutputFormat;
use beri::config::Config;
use beri::embedding::{create_provider, EmbeddingProvider};
use beri::storage::{ChunkStore, DATA_DIR};

/// Settings shared by every subcommand
pub struct Context {
    pub config: Config,
    pub data_dir: PathBuf,
    pub format: OutputFormat,
    pub compact: bool,
}

impl Context {
    pub fn new(data_dir: Option<PathBuf>, format: OutputFormat, compact: bool) -> Self {
        Self {
            config: Config::load(),
            data_dir: data_dir.unwrap_or_else(|| PathBuf::from(DATA_DIR)),
            format,
            compact,
        }
    }

    /// Chunk store path: `[storage] path` from config, else `<data-dir>/chunks.sqlite`
    pub fn store_path(&self) -> PathBuf {
        self.config
            .storage
            .path()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir.join("chunks.sqlite"))
    }

    /// Unopened chunk store for the configured corpus version
    pub fn store(&self) -> ChunkStore {
        let path = self.store_path();
        debug!(path = %path.display(), "using chunk store");
        ChunkStore::at_path(path, self.config.corpus.version())
    }

    /// Opened chunk store
    pub fn open_store(&self) -> Result<ChunkStore> {
        let mut store = self.store();
        store
            .initialize()
            .context("Failed to open chunk store")?;
        Ok(store)
    }

    pub fn embedder(&self) -> Result<Box<dyn EmbeddingProvider>> {
        create_provider(&self.config.embeddings).context("Failed to create embedding provider")
    }

    pub fn use_color(&self) -> bool {
        beri::output::use_colors() && self.format == OutputFormat::Text
    }
}
