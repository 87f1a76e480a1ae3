// SPDX-License-Identifier: MIT OR Apache-2.0

//! One question-to-answer turn: retrieve, assemble context, generate.

use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::corpus::{MessageSource, ScoredChunk};
use crate::embedding::EmbeddingProvider;
use crate::errors::{Error, Result};
use crate::generation::{
    GenerationProvider, GenerationRequest, DEFAULT_MAX_TOKENS, DEFAULT_SYSTEM_PROMPT,
    DEFAULT_TEMPERATURE,
};
use crate::retrieval::{extract_sources, format_context, RetrievalPolicy, Retriever};
use crate::storage::ChunkStore;

/// Message shown to the user when any step of a turn fails.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Sorry, I encountered an error while generating a response. Please try again.";

/// Knobs for a turn.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub policy: RetrievalPolicy,
    pub system_prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            policy: RetrievalPolicy::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

impl AssistantSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.policy(),
            system_prompt: config.generation.system_prompt().to_string(),
            max_tokens: config.generation.max_tokens(),
            temperature: config.generation.temperature(),
        }
    }
}

/// A completed answer with the citations it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<MessageSource>,
    pub chunks: Vec<ScoredChunk>,
}

/// Answers questions against the chunk store.
pub struct Assistant<'a> {
    retriever: Retriever<'a>,
    generator: &'a mut dyn GenerationProvider,
    settings: AssistantSettings,
}

impl<'a> Assistant<'a> {
    pub fn new(
        store: &'a ChunkStore,
        embedder: &'a mut dyn EmbeddingProvider,
        generator: &'a mut dyn GenerationProvider,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            retriever: Retriever::new(store, embedder, settings.policy.clone()),
            generator,
            settings,
        }
    }

    /// Answers `query`, calling `on_token` as each token streams in.
    ///
    /// Sources are only known to be final once the whole answer is back, so
    /// they are returned with the [`Answer`] rather than up front.
    pub fn ask<F>(&mut self, query: &str, mut on_token: F) -> Result<Answer>
    where
        F: FnMut(&str),
    {
        let chunks = self.retriever.retrieve(query)?;
        let context = format_context(&chunks);
        let sources = extract_sources(&chunks);
        debug!(chunks = chunks.len(), sources = sources.len(), "context assembled");

        let request = GenerationRequest {
            system_prompt: &self.settings.system_prompt,
            context: &context,
            query,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let mut text = String::new();
        let stream = self.generator.generate(&request).map_err(Error::generation)?;
        for token in stream {
            let token = token.map_err(Error::generation)?;
            on_token(&token);
            text.push_str(&token);
        }

        Ok(Answer {
            text,
            sources,
            chunks,
        })
    }
}
