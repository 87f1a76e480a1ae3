// SPDX-License-Identifier: MIT OR Apache-2.0

//! Corpus data model: raw records, embedded chunks, scored results and
//! citation keys.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::Path;

/// Corpus version compiled into this build.
///
/// Any change to the bundled corpus content must bump this value, otherwise
/// cached embeddings are considered fresh.
pub const DEFAULT_CORPUS_VERSION: &str = "1";

/// Provenance of a chunk within the policy corpus.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Document name
    pub source: String,
    /// Human-readable section label
    pub section: String,
    /// Position within the source document
    pub chunk_index: u32,
}

/// A corpus record as shipped at build time, before embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChunk {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// An indexed unit of policy text with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Builds a chunk from a raw record and its computed embedding.
    pub fn from_raw(raw: &RawChunk, embedding: Vec<f32>) -> Self {
        Self {
            id: raw.id.clone(),
            content: raw.content.clone(),
            embedding,
            metadata: raw.metadata.clone(),
        }
    }

    /// Returns the record without its embedding.
    pub fn to_raw(&self) -> RawChunk {
        RawChunk {
            id: self.id.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// A chunk scored against a query. Computed per query, never persisted.
///
/// Serializes as the chunk's id, content and metadata plus `score`; the
/// embedding is left out of result output.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query
    pub score: f32,
}

#[derive(Serialize)]
struct ScoredChunkView<'a> {
    id: &'a str,
    content: &'a str,
    metadata: &'a ChunkMetadata,
    score: f32,
}

impl Serialize for ScoredChunk {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ScoredChunkView {
            id: &self.chunk.id,
            content: &self.chunk.content,
            metadata: &self.chunk.metadata,
            score: self.score,
        }
        .serialize(serializer)
    }
}

impl ScoredChunk {
    pub fn source(&self) -> &str {
        &self.chunk.metadata.source
    }

    pub fn section(&self) -> &str {
        &self.chunk.metadata.section
    }
}

/// Citation key shown alongside an answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageSource {
    pub source: String,
    pub section: String,
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.source, self.section)
    }
}

/// Version token gating whether stored embeddings are fresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorpusVersion(String);

impl CorpusVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorpusVersion {
    fn default() -> Self {
        Self::new(DEFAULT_CORPUS_VERSION)
    }
}

impl fmt::Display for CorpusVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorpusVersion {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Computes a content fingerprint of the corpus.
///
/// Order-sensitive: the same records in a different order fingerprint
/// differently, matching the storage order the retriever tie-breaks on.
pub fn fingerprint(chunks: &[RawChunk]) -> String {
    let mut hasher = blake3::Hasher::new();
    for chunk in chunks {
        for field in [
            chunk.id.as_str(),
            chunk.content.as_str(),
            chunk.metadata.source.as_str(),
            chunk.metadata.section.as_str(),
        ] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(&chunk.metadata.chunk_index.to_le_bytes());
    }
    hasher.finalize().to_hex()[..32].to_string()
}

/// Reads a raw corpus (`[{id, content, metadata}]`) from a JSON file.
pub fn read_corpus<P: AsRef<Path>>(path: P) -> Result<Vec<RawChunk>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse corpus: {}", path.display()))
}

/// Reads a corpus whose records already carry their embeddings.
pub fn read_precomputed<P: AsRef<Path>>(path: P) -> Result<Vec<Chunk>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse precomputed corpus: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, content: &str) -> RawChunk {
        RawChunk {
            id: id.to_string(),
            content: content.to_string(),
            metadata: ChunkMetadata {
                source: "Mobile Phone Policy".to_string(),
                section: "Use in lessons".to_string(),
                chunk_index: 0,
            },
        }
    }

    #[test]
    fn metadata_uses_camel_case_chunk_index() {
        let json = r#"{"id":"a","content":"x","metadata":{"source":"S","section":"T","chunkIndex":4}}"#;
        let parsed: RawChunk = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.metadata.chunk_index, 4);

        let out = serde_json::to_string(&parsed.metadata).unwrap();
        assert!(out.contains("\"chunkIndex\":4"));
    }

    #[test]
    fn scored_chunk_serializes_flat() {
        let scored = ScoredChunk {
            chunk: Chunk::from_raw(&raw("a", "text"), vec![1.0]),
            score: 0.5,
        };
        let value = serde_json::to_value(&scored).unwrap();
        assert_eq!(value["id"], "a");
        assert_eq!(value["content"], "text");
        assert_eq!(value["metadata"]["chunkIndex"], 0);
        assert_eq!(value["score"], 0.5);
    }

    #[test]
    fn scored_chunk_output_omits_embedding() {
        let scored = ScoredChunk {
            chunk: Chunk::from_raw(&raw("a", "text"), vec![0.25; 384]),
            score: 0.9,
        };
        let value = serde_json::to_value(&scored).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 4);
        assert!(value.get("embedding").is_none());
        assert!(!serde_json::to_string(&scored).unwrap().contains("0.25"));
    }

    #[test]
    fn fingerprint_tracks_content_and_order() {
        let a = vec![raw("1", "first"), raw("2", "second")];
        let same = a.clone();
        let edited = vec![raw("1", "first"), raw("2", "second!")];
        let reordered = vec![raw("2", "second"), raw("1", "first")];

        assert_eq!(fingerprint(&a), fingerprint(&same));
        assert_ne!(fingerprint(&a), fingerprint(&edited));
        assert_ne!(fingerprint(&a), fingerprint(&reordered));
    }

    #[test]
    fn fingerprint_is_not_fooled_by_field_boundaries() {
        let a = vec![raw("ab", "c")];
        let b = vec![raw("a", "bc")];
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn read_corpus_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        std::fs::write(
            &path,
            r#"[{"id":"p-0","content":"Phones stay in lockers.","metadata":{"source":"Mobile Phone Policy","section":"Storage","chunkIndex":0}}]"#,
        )
        .unwrap();

        let corpus = read_corpus(&path).unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].metadata.section, "Storage");
        assert!(read_precomputed(&path).is_err());
    }
}
