// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed chunk store.
//!
//! Holds the policy corpus together with its precomputed embeddings, so the
//! embedding model only runs over the corpus when its version changes. The
//! corpus version marker, fingerprint and dimension live in a separate `meta`
//! table and are written in the same transaction as the chunks.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::corpus::{fingerprint, Chunk, ChunkMetadata, CorpusVersion, RawChunk};
use crate::errors::{Error, Result};

/// Bumped whenever the table layout changes; a mismatch drops all tables.
const SCHEMA_VERSION: &str = "1";

const META_SCHEMA_VERSION: &str = "schema_version";
const META_CORPUS_VERSION: &str = "corpus_version";
const META_FINGERPRINT: &str = "corpus_fingerprint";
const META_DIMENSION: &str = "embedding_dim";

/// Directory holding beri's local state.
pub const DATA_DIR: &str = ".beri";

/// Where the chunk collection lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

impl StoreLocation {
    fn describe(&self) -> String {
        match self {
            StoreLocation::File(path) => path.display().to_string(),
            StoreLocation::Memory => ":memory:".to_string(),
        }
    }
}

/// Persistent keyed collection of embedded chunks.
///
/// Created unopened; every operation other than [`ChunkStore::initialize`]
/// fails with [`Error::StorageNotInitialized`] until it has been opened.
pub struct ChunkStore {
    location: StoreLocation,
    expected_version: CorpusVersion,
    conn: Option<Connection>,
}

impl ChunkStore {
    pub fn new(location: StoreLocation, expected_version: CorpusVersion) -> Self {
        Self {
            location,
            expected_version,
            conn: None,
        }
    }

    /// Store backed by a database file.
    pub fn at_path<P: AsRef<Path>>(path: P, expected_version: CorpusVersion) -> Self {
        Self::new(
            StoreLocation::File(path.as_ref().to_path_buf()),
            expected_version,
        )
    }

    /// Non-persistent store, used by tests and one-shot runs.
    pub fn in_memory(expected_version: CorpusVersion) -> Self {
        Self::new(StoreLocation::Memory, expected_version)
    }

    /// Opens or creates the collection. Calling it again is a no-op.
    pub fn initialize(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let unavailable = |source: Box<dyn std::error::Error + Send + Sync>| {
            Error::StorageUnavailable {
                path: self.location.describe(),
                source,
            }
        };

        let conn = match &self.location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| unavailable(e.into()))?;
                }
                Connection::open(path).map_err(|e| unavailable(e.into()))?
            }
            StoreLocation::Memory => {
                Connection::open_in_memory().map_err(|e| unavailable(e.into()))?
            }
        };

        init_schema(&conn).map_err(|e| unavailable(e.into()))?;
        debug!(location = %self.location.describe(), "chunk store opened");
        self.conn = Some(conn);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.conn.is_some()
    }

    /// Database file path, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            StoreLocation::File(path) => Some(path),
            StoreLocation::Memory => None,
        }
    }

    /// The corpus version this build expects.
    pub fn expected_version(&self) -> &CorpusVersion {
        &self.expected_version
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::StorageNotInitialized)
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(Error::StorageNotInitialized)
    }

    /// True iff the store holds chunks *and* its marker matches the
    /// expected corpus version. Stale rows count as unpopulated.
    pub fn is_populated(&self) -> Result<bool> {
        if self.count()? == 0 {
            return Ok(false);
        }
        Ok(self.corpus_version()?.as_ref() == Some(&self.expected_version))
    }

    /// Replaces the whole collection, embedding each record in input order.
    pub fn load_corpus<E>(&mut self, raw_chunks: &[RawChunk], embed: E) -> Result<usize>
    where
        E: FnMut(&str) -> anyhow::Result<Vec<f32>>,
    {
        self.load_corpus_with_progress(raw_chunks, embed, |_, _| {})
    }

    /// Like [`ChunkStore::load_corpus`], reporting `(current, total)` after
    /// each insert (`current` is 1-indexed).
    ///
    /// Runs in a single transaction. On any failure nothing is committed:
    /// the previous chunks and version marker are left as they were.
    pub fn load_corpus_with_progress<E, P>(
        &mut self,
        raw_chunks: &[RawChunk],
        mut embed: E,
        on_progress: P,
    ) -> Result<usize>
    where
        E: FnMut(&str) -> anyhow::Result<Vec<f32>>,
        P: FnMut(usize, usize),
    {
        let corpus_fingerprint = fingerprint(raw_chunks);
        let chunks = raw_chunks.iter().map(|raw| {
            let embedding =
                embed(&raw.content).map_err(|e| Error::embedding(format!("chunk {}", raw.id), e))?;
            Ok(Chunk::from_raw(raw, embedding))
        });
        self.replace_all(raw_chunks.len(), &corpus_fingerprint, chunks, on_progress)
    }

    /// Replaces the whole collection with chunks that already carry
    /// embeddings. Same atomicity and validation as `load_corpus`.
    pub fn import_chunks<P>(&mut self, chunks: &[Chunk], on_progress: P) -> Result<usize>
    where
        P: FnMut(usize, usize),
    {
        let raw: Vec<RawChunk> = chunks.iter().map(Chunk::to_raw).collect();
        let corpus_fingerprint = fingerprint(&raw);
        self.replace_all(
            chunks.len(),
            &corpus_fingerprint,
            chunks.iter().cloned().map(Ok),
            on_progress,
        )
    }

    fn replace_all<I, P>(
        &mut self,
        total: usize,
        corpus_fingerprint: &str,
        chunks: I,
        mut on_progress: P,
    ) -> Result<usize>
    where
        I: Iterator<Item = Result<Chunk>>,
        P: FnMut(usize, usize),
    {
        let version = self.expected_version.clone();
        let conn = self.conn_mut()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM chunks", [])?;

        let mut dimension: Option<usize> = None;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO chunks (id, position, content, source, section, chunk_index, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                    position = excluded.position,
                    content = excluded.content,
                    source = excluded.source,
                    section = excluded.section,
                    chunk_index = excluded.chunk_index,
                    embedding = excluded.embedding
                "#,
            )?;

            for (position, chunk) in chunks.enumerate() {
                let chunk = chunk?;
                let expected = *dimension.get_or_insert(chunk.embedding.len());
                if chunk.embedding.len() != expected {
                    return Err(Error::DimensionMismatch {
                        expected,
                        actual: chunk.embedding.len(),
                    });
                }

                stmt.execute(params![
                    chunk.id,
                    position as i64,
                    chunk.content,
                    chunk.metadata.source,
                    chunk.metadata.section,
                    chunk.metadata.chunk_index,
                    embedding_to_blob(&chunk.embedding),
                ])?;
                on_progress(position + 1, total);
            }
        }

        set_meta(&tx, META_CORPUS_VERSION, version.as_str())?;
        set_meta(&tx, META_FINGERPRINT, corpus_fingerprint)?;
        set_meta(&tx, META_DIMENSION, &dimension.unwrap_or(0).to_string())?;
        let stored = count_chunks(&tx)?;
        tx.commit()?;

        info!(chunks = stored, version = %version, "corpus loaded");
        Ok(stored)
    }

    /// Returns every stored chunk in load order.
    pub fn get_all(&self) -> Result<Vec<Chunk>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, content, source, section, chunk_index, embedding
            FROM chunks
            ORDER BY position
            "#,
        )?;

        let chunks = stmt
            .query_map([], |row| {
                let embedding_blob: Vec<u8> = row.get(5)?;
                Ok(Chunk {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    embedding: blob_to_embedding(5, &embedding_blob)?,
                    metadata: ChunkMetadata {
                        source: row.get(2)?,
                        section: row.get(3)?,
                        chunk_index: row.get(4)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(chunks)
    }

    /// Number of stored chunks.
    pub fn count(&self) -> Result<usize> {
        count_chunks(self.conn()?)
    }

    /// Removes all chunks. The version marker is left alone.
    pub fn clear(&mut self) -> Result<()> {
        self.conn()?.execute("DELETE FROM chunks", [])?;
        Ok(())
    }

    /// The persisted corpus version marker, if a load ever completed.
    pub fn corpus_version(&self) -> Result<Option<CorpusVersion>> {
        Ok(get_meta(self.conn()?, META_CORPUS_VERSION)?.map(CorpusVersion::new))
    }

    /// Fingerprint of the corpus from the last completed load.
    pub fn fingerprint(&self) -> Result<Option<String>> {
        get_meta(self.conn()?, META_FINGERPRINT)
    }

    /// Embedding dimension from the last completed load.
    pub fn dimension(&self) -> Result<Option<usize>> {
        Ok(get_meta(self.conn()?, META_DIMENSION)?.and_then(|v| v.parse().ok()))
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    let stored = get_meta_raw(conn, META_SCHEMA_VERSION)?;
    if stored.is_some() && stored.as_deref() != Some(SCHEMA_VERSION) {
        debug!(?stored, "chunk store schema changed, resetting");
        conn.execute_batch(
            r#"
            DROP TABLE IF EXISTS chunks;
            DELETE FROM meta;
            "#,
        )?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            content TEXT NOT NULL,
            source TEXT NOT NULL,
            section TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            embedding BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_position ON chunks(position);
        "#,
    )?;

    conn.execute(
        r#"
        INSERT INTO meta (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![META_SCHEMA_VERSION, SCHEMA_VERSION],
    )?;
    Ok(())
}

fn count_chunks(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
    Ok(count as usize)
}

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(get_meta_raw(conn, key)?)
}

fn get_meta_raw(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn set_meta(tx: &Transaction<'_>, key: &str, value: &str) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO meta (key, value)
        VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, value],
    )?;
    Ok(())
}

/// Converts an embedding vector to a compact little-endian blob.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Converts a blob back to an embedding vector.
///
/// A length that is not a whole number of `f32`s means the row is corrupt.
fn blob_to_embedding(column: usize, blob: &[u8]) -> rusqlite::Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Blob,
            format!(
                "embedding blob of {} bytes is not a whole number of f32 values",
                blob.len()
            )
            .into(),
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn raw(id: &str, content: &str, section: &str) -> RawChunk {
        RawChunk {
            id: id.to_string(),
            content: content.to_string(),
            metadata: ChunkMetadata {
                source: "Acceptable Use Policy".to_string(),
                section: section.to_string(),
                chunk_index: 0,
            },
        }
    }

    fn length_embed(text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![text.len() as f32, 1.0, 0.0])
    }

    fn initialized() -> ChunkStore {
        let mut store = ChunkStore::in_memory(CorpusVersion::new("v1"));
        store.initialize().unwrap();
        store
    }

    #[test]
    fn methods_fail_before_initialize() {
        let mut store = ChunkStore::in_memory(CorpusVersion::new("v1"));
        assert!(matches!(store.get_all(), Err(Error::StorageNotInitialized)));
        assert!(matches!(store.count(), Err(Error::StorageNotInitialized)));
        assert!(matches!(store.clear(), Err(Error::StorageNotInitialized)));
        assert!(matches!(
            store.load_corpus(&[], length_embed),
            Err(Error::StorageNotInitialized)
        ));
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut store = initialized();
        store.initialize().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn initialize_reports_unavailable_storage() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let mut store = ChunkStore::at_path(blocker.join("chunks.sqlite"), "v1".into());
        let err = store.initialize().unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable { .. }));
        assert!(!store.is_initialized());
    }

    #[test]
    fn load_corpus_embeds_in_order_and_reports_progress() {
        let mut store = initialized();
        let corpus = vec![
            raw("a", "phones", "Lessons"),
            raw("b", "plagiarism", "Coursework"),
        ];
        let mut progress = Vec::new();

        let stored = store
            .load_corpus_with_progress(&corpus, length_embed, |current, total| {
                progress.push((current, total))
            })
            .unwrap();

        assert_eq!(stored, 2);
        assert_eq!(progress, vec![(1, 2), (2, 2)]);
        let chunks = store.get_all().unwrap();
        assert_eq!(chunks[0].id, "a");
        assert_eq!(chunks[0].embedding, vec![6.0, 1.0, 0.0]);
        assert_eq!(chunks[1].metadata.section, "Coursework");
        assert_eq!(store.dimension().unwrap(), Some(3));
    }

    #[test]
    fn populated_requires_rows_and_matching_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.sqlite");
        let corpus = vec![raw("a", "phones", "Lessons")];

        let mut store = ChunkStore::at_path(&path, "v1".into());
        store.initialize().unwrap();
        assert!(!store.is_populated().unwrap());
        store.load_corpus(&corpus, length_embed).unwrap();
        assert!(store.is_populated().unwrap());
        drop(store);

        let mut bumped = ChunkStore::at_path(&path, "v2".into());
        bumped.initialize().unwrap();
        assert_eq!(bumped.count().unwrap(), 1);
        assert!(!bumped.is_populated().unwrap());
    }

    #[test]
    fn clear_keeps_version_marker() {
        let mut store = initialized();
        store
            .load_corpus(&[raw("a", "phones", "Lessons")], length_embed)
            .unwrap();

        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(!store.is_populated().unwrap());
        assert_eq!(store.corpus_version().unwrap(), Some("v1".into()));
    }

    #[test]
    fn embedding_failure_leaves_marker_and_rows_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.sqlite");
        let corpus = vec![raw("a", "phones", "Lessons"), raw("b", "ai", "Homework")];

        let mut old = ChunkStore::at_path(&path, "v1".into());
        old.initialize().unwrap();
        old.load_corpus(&corpus[..1], length_embed).unwrap();
        drop(old);

        let mut store = ChunkStore::at_path(&path, "v2".into());
        store.initialize().unwrap();
        let mut calls = 0;
        let err = store
            .load_corpus(&corpus, |text| {
                calls += 1;
                if calls == 2 {
                    anyhow::bail!("model crashed");
                }
                length_embed(text)
            })
            .unwrap_err();

        assert!(matches!(err, Error::EmbeddingFailure { .. }));
        assert_eq!(store.corpus_version().unwrap(), Some("v1".into()));
        assert_eq!(store.count().unwrap(), 1);
        assert!(!store.is_populated().unwrap());
    }

    #[test]
    fn inconsistent_dimensions_are_rejected() {
        let mut store = initialized();
        let corpus = vec![raw("a", "one", "S"), raw("b", "two", "S")];
        let mut first = true;
        let err = store
            .load_corpus(&corpus, |_| {
                let v = if first { vec![1.0, 0.0] } else { vec![1.0] };
                first = false;
                Ok(v)
            })
            .unwrap_err();

        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.corpus_version().unwrap(), None);
    }

    #[test]
    fn duplicate_ids_overwrite() {
        let mut store = initialized();
        let corpus = vec![
            raw("same", "first", "S"),
            raw("other", "middle", "S"),
            raw("same", "second", "S"),
        ];
        assert_eq!(store.load_corpus(&corpus, length_embed).unwrap(), 2);

        let chunks = store.get_all().unwrap();
        assert_eq!(chunks[0].id, "other");
        assert_eq!(chunks[1].content, "second");
    }

    #[test]
    fn reload_is_idempotent() {
        let mut store = initialized();
        let corpus = vec![raw("a", "phones", "Lessons"), raw("b", "ai", "Homework")];

        store.load_corpus(&corpus, length_embed).unwrap();
        let first = store.get_all().unwrap();
        store.load_corpus(&corpus, length_embed).unwrap();

        assert_eq!(store.get_all().unwrap(), first);
        assert_eq!(store.fingerprint().unwrap(), Some(fingerprint(&corpus)));
    }

    #[test]
    fn import_chunks_keeps_precomputed_embeddings() {
        let mut store = initialized();
        let chunks = vec![Chunk::from_raw(&raw("a", "phones", "Lessons"), vec![0.25, 0.5])];

        store.import_chunks(&chunks, |_, _| {}).unwrap();

        assert_eq!(store.get_all().unwrap(), chunks);
        assert!(store.is_populated().unwrap());
    }

    #[test]
    fn blob_roundtrip() {
        let v = vec![0.1_f32, -2.5, 3.0];
        assert_eq!(blob_to_embedding(0, &embedding_to_blob(&v)).unwrap(), v);
    }

    #[test]
    fn truncated_embedding_blob_is_a_storage_error() {
        let mut store = initialized();
        store
            .load_corpus(&[raw("a", "phones", "Lessons")], length_embed)
            .unwrap();
        store
            .conn
            .as_ref()
            .unwrap()
            .execute("UPDATE chunks SET embedding = ?1", params![vec![0u8; 5]])
            .unwrap();

        assert!(matches!(store.get_all(), Err(Error::Storage(_))));
    }
}
