// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding boundary: turns text into fixed-dimension vectors.
//!
//! The retrieval core only sees the [`EmbeddingProvider`] trait; concrete
//! providers are chosen from configuration by [`create_provider`].

pub mod provider;

#[cfg(not(all(target_os = "macos", target_arch = "x86_64")))]
pub use provider::FastEmbedder;
pub use provider::{
    create_provider, CommandProvider, DummyProvider, EmbeddingProvider, EmbeddingProviderConfig,
    HashingProvider, DEFAULT_EMBEDDING_DIM,
};
