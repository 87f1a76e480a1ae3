// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query-time ranking over the chunk store.

use tracing::debug;

use crate::corpus::{Chunk, ScoredChunk};
use crate::embedding::EmbeddingProvider;
use crate::errors::{Error, Result};
use crate::retrieval::similarity::cosine_similarity;
use crate::storage::ChunkStore;

/// Default minimum score for a chunk to count as relevant.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.2;

/// Default number of chunks handed to generation.
pub const DEFAULT_TOP_K: usize = 3;

/// Default number of chunks returned when nothing clears the threshold.
pub const DEFAULT_FALLBACK_COUNT: usize = 2;

/// Ranking and cut-off knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPolicy {
    /// Chunks scoring below this are dropped
    pub similarity_threshold: f32,
    /// Maximum number of chunks returned
    pub top_k: usize,
    /// Chunks returned by raw score when none clear the threshold (0 disables)
    pub fallback_count: usize,
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            fallback_count: DEFAULT_FALLBACK_COUNT,
        }
    }
}

impl RetrievalPolicy {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_fallback_count(mut self, count: usize) -> Self {
        self.fallback_count = count;
        self
    }

    fn effective_top_k(&self) -> usize {
        self.top_k.max(1)
    }
}

/// Scores `chunks` against `query_embedding` and applies the policy.
///
/// Output is sorted by descending score; equal scores keep their input
/// order. When no chunk clears the threshold the best `fallback_count`
/// chunks are returned instead, so a non-empty corpus never yields an
/// empty result unless the fallback is disabled.
pub fn rank(
    query_embedding: &[f32],
    chunks: Vec<Chunk>,
    policy: &RetrievalPolicy,
) -> Result<Vec<ScoredChunk>> {
    let mut scored = chunks
        .into_iter()
        .map(|chunk| {
            let score = cosine_similarity(query_embedding, &chunk.embedding)?;
            Ok(ScoredChunk { chunk, score })
        })
        .collect::<Result<Vec<_>>>()?;

    // sort_by is stable, so ties stay in storage order
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));

    let relevant = scored
        .iter()
        .take_while(|c| c.score >= policy.similarity_threshold)
        .take(policy.effective_top_k())
        .count();

    if relevant == 0 && !scored.is_empty() {
        debug!(
            threshold = policy.similarity_threshold,
            best = scored[0].score,
            "no chunk cleared threshold, using fallback"
        );
        scored.truncate(policy.fallback_count);
    } else {
        scored.truncate(relevant);
    }

    Ok(scored)
}

/// Stateless query pipeline over a chunk store and an embedding provider.
///
/// Borrowing both collaborators keeps the retriever cheap to rebuild per
/// query; it holds no state of its own.
pub struct Retriever<'a> {
    store: &'a ChunkStore,
    embedder: &'a mut dyn EmbeddingProvider,
    policy: RetrievalPolicy,
}

impl<'a> Retriever<'a> {
    pub fn new(
        store: &'a ChunkStore,
        embedder: &'a mut dyn EmbeddingProvider,
        policy: RetrievalPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            policy,
        }
    }

    pub fn policy(&self) -> &RetrievalPolicy {
        &self.policy
    }

    /// Returns the chunks most relevant to `query`, best first.
    ///
    /// An empty store yields an empty result rather than an error.
    pub fn retrieve(&mut self, query: &str) -> Result<Vec<ScoredChunk>> {
        let query_embedding = self
            .embedder
            .embed_one(query)
            .map_err(|e| Error::embedding("query", e))?;

        let chunks = self.store.get_all()?;
        if chunks.is_empty() {
            debug!("chunk store is empty, nothing to retrieve");
            return Ok(Vec::new());
        }

        let total = chunks.len();
        let results = rank(&query_embedding, chunks, &self.policy)?;
        debug!(candidates = total, returned = results.len(), "retrieved chunks");
        Ok(results)
    }
}
