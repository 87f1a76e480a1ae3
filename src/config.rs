// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for beri
//!
//! Loads configuration from .berirc.toml in current directory or ~/.config/beri/config.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::corpus::{CorpusVersion, DEFAULT_CORPUS_VERSION};
use crate::generation::{DEFAULT_MAX_TOKENS, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE};
use crate::retrieval::RetrievalPolicy;

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    #[default]
    Builtin,
    Command,
    Hashing,
    Dummy,
}

/// Generation provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProviderType {
    Command,
    #[default]
    Echo,
}

/// Retrieval configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a chunk to be used
    pub similarity_threshold: Option<f32>,
    /// Maximum number of chunks handed to generation
    pub top_k: Option<usize>,
    /// Chunks returned when none clear the threshold (0 disables)
    pub fallback_count: Option<usize>,
}

impl RetrievalConfig {
    /// Builds the ranking policy, filling gaps with defaults
    pub fn policy(&self) -> RetrievalPolicy {
        let defaults = RetrievalPolicy::default();
        RetrievalPolicy {
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(defaults.similarity_threshold),
            top_k: self.top_k.unwrap_or(defaults.top_k).max(1),
            fallback_count: self.fallback_count.unwrap_or(defaults.fallback_count),
        }
    }
}

/// Corpus configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Corpus version token; bump whenever the corpus content changes
    pub version: Option<String>,
    /// Path to the corpus JSON file
    pub path: Option<PathBuf>,
}

impl CorpusConfig {
    /// Get corpus version (defaults to the compiled-in version)
    pub fn version(&self) -> CorpusVersion {
        CorpusVersion::new(self.version.as_deref().unwrap_or(DEFAULT_CORPUS_VERSION))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type (builtin, command, hashing, dummy)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier sent to the command provider. The builtin provider
    /// always runs all-MiniLM-L6-v2, and hashing and dummy have no model.
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Vector dimension for the hashing and dummy providers
    pub dimension: Option<usize>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Builtin)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to "all-minilm-l6-v2")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("all-minilm-l6-v2")
    }

    /// Returns the configured model when the selected provider does not use it.
    pub fn ignored_model(&self) -> Option<&str> {
        match self.provider() {
            EmbeddingProviderType::Command => None,
            _ => self.model.as_deref(),
        }
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    /// Get dimension (defaults to 384)
    pub fn dimension(&self) -> usize {
        self.dimension
            .filter(|d| *d > 0)
            .unwrap_or(crate::embedding::DEFAULT_EMBEDDING_DIM)
    }
}

/// Generation configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Provider type (command, echo)
    pub provider: Option<GenerationProviderType>,
    /// Model identifier passed to the command provider
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Maximum number of tokens to generate
    pub max_tokens: Option<usize>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Override for the system prompt
    pub system_prompt: Option<String>,
}

impl GenerationConfig {
    /// Get provider type (defaults to Echo)
    pub fn provider(&self) -> GenerationProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to "local-llm")
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("local-llm")
    }

    /// Get command (defaults to "generator")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("generator")
    }

    /// Get max tokens (defaults to 150)
    pub fn max_tokens(&self) -> usize {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    /// Get temperature (defaults to 0.3)
    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the chunk database
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Configuration loaded from .berirc.toml or ~/.config/beri/config.toml
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub corpus: CorpusConfig,

    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .berirc.toml in current directory
    /// 2. ~/.config/beri/config.toml
    pub fn load() -> Self {
        if let Some(config) = Self::load_from_path(Path::new(".berirc.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("beri").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match Self::from_toml_str(&content) {
            Ok(config) => {
                debug!(path = %path.display(), "loaded config");
                Some(config)
            }
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the retrieval policy
    pub fn policy(&self) -> RetrievalPolicy {
        self.retrieval.policy()
    }
}
