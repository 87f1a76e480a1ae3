// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the retrieval core.

use thiserror::Error;

/// Boxed error carried from an external provider.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for beri operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the chunk store, scorer, retriever and assistant.
///
/// Empty corpora and below-threshold queries are not errors; they are
/// handled by the retrieval policy.
#[derive(Error, Debug)]
pub enum Error {
    /// The persistent chunk collection could not be opened
    #[error("chunk storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: String,
        #[source]
        source: ProviderError,
    },

    /// A store method was called before `initialize()`
    #[error("chunk store used before initialize()")]
    StorageNotInitialized,

    /// Two vectors of different length were compared
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding provider failed
    #[error("failed to embed {subject}: {source}")]
    EmbeddingFailure {
        subject: String,
        #[source]
        source: ProviderError,
    },

    /// The generation provider failed
    #[error("generation failed: {source}")]
    GenerationFailure {
        #[source]
        source: ProviderError,
    },

    /// A load was requested with no corpus records
    #[error("corpus contains no chunks")]
    EmptyCorpus,

    /// SQLite error after the store was opened
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl Error {
    pub(crate) fn embedding(subject: impl Into<String>, source: anyhow::Error) -> Self {
        Self::EmbeddingFailure {
            subject: subject.into(),
            source: source.into(),
        }
    }

    pub(crate) fn generation(source: anyhow::Error) -> Self {
        Self::GenerationFailure {
            source: source.into(),
        }
    }

    /// Returns true for errors that indicate a corpus/model mismatch
    /// rather than a transient failure.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::DimensionMismatch { .. } | Error::StorageNotInitialized
        )
    }
}
