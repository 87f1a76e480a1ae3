// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrieval pipeline: score, rank and assemble policy context for a query.
//!
//! ```text
//! query -> EmbeddingProvider -> ChunkStore::get_all -> cosine_similarity
//!       -> rank (sort, threshold, top-k, fallback) -> format_context / extract_sources
//! ```

pub mod context;
pub mod retriever;
pub mod similarity;

pub use context::{extract_sources, format_context, NO_CONTEXT_MESSAGE};
pub use retriever::{rank, RetrievalPolicy, Retriever};
pub use similarity::cosine_similarity;
