// SPDX-License-Identifier: MIT OR Apache-2.0

//! Staged startup: open storage, warm up the embedder, make sure the corpus
//! is loaded, and check the generator, reporting progress along the way.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::corpus::{fingerprint, Chunk, RawChunk};
use crate::embedding::EmbeddingProvider;
use crate::errors::{Error, Result};
use crate::generation::GenerationProvider;
use crate::storage::ChunkStore;

const CHUNKS_START: u8 = 35;
const CHUNKS_END: u8 = 85;

/// Startup stage, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Checking,
    Storage,
    Embeddings,
    Chunks,
    Generation,
    Ready,
    Error,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Checking => "checking",
            Stage::Storage => "storage",
            Stage::Embeddings => "embeddings",
            Stage::Chunks => "chunks",
            Stage::Generation => "generation",
            Stage::Ready => "ready",
            Stage::Error => "error",
        };
        f.write_str(name)
    }
}

/// Progress snapshot handed to the caller's callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadingState {
    pub stage: Stage,
    /// Overall progress, 0 to 100.
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadingState {
    fn new(stage: Stage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress: progress.min(100),
            message: message.into(),
            error: None,
        }
    }

    fn failed(err: &Error) -> Self {
        Self {
            stage: Stage::Error,
            progress: 0,
            message: "Startup failed".to_string(),
            error: Some(err.to_string()),
        }
    }
}

/// Shared flag that asks a running bootstrap to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a bootstrap run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Every stage completed. `reloaded` is true if the corpus was
    /// (re-)embedded during this run.
    Ready { chunks: usize, reloaded: bool },
    Cancelled,
}

/// Corpus records to make resident.
#[derive(Debug, Clone)]
pub enum CorpusSource {
    /// Records that still need embedding.
    Raw(Vec<RawChunk>),
    /// Records that already carry embeddings.
    Precomputed(Vec<Chunk>),
}

impl CorpusSource {
    fn len(&self) -> usize {
        match self {
            CorpusSource::Raw(chunks) => chunks.len(),
            CorpusSource::Precomputed(chunks) => chunks.len(),
        }
    }

    fn fingerprint(&self) -> String {
        match self {
            CorpusSource::Raw(chunks) => fingerprint(chunks),
            CorpusSource::Precomputed(chunks) => {
                let raw: Vec<RawChunk> = chunks.iter().map(Chunk::to_raw).collect();
                fingerprint(&raw)
            }
        }
    }
}

/// Runs the startup stages against a store and providers.
pub struct Bootstrap<'a> {
    store: &'a mut ChunkStore,
    embedder: &'a mut dyn EmbeddingProvider,
    generator: Option<&'a dyn GenerationProvider>,
    corpus: CorpusSource,
    cancel: CancellationFlag,
    force: bool,
}

impl<'a> Bootstrap<'a> {
    pub fn new(
        store: &'a mut ChunkStore,
        embedder: &'a mut dyn EmbeddingProvider,
        corpus: CorpusSource,
    ) -> Self {
        Self {
            store,
            embedder,
            generator: None,
            corpus,
            cancel: CancellationFlag::new(),
            force: false,
        }
    }

    /// Also checks and reports on a generation provider.
    pub fn with_generator(mut self, generator: &'a dyn GenerationProvider) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reload the corpus even if the store looks current.
    pub fn force_reload(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Runs every stage, calling `on_state` on each transition.
    ///
    /// On failure an [`Stage::Error`] state is emitted before the error is
    /// returned.
    pub fn run<F>(&mut self, mut on_state: F) -> Result<BootstrapOutcome>
    where
        F: FnMut(&LoadingState),
    {
        match self.run_stages(&mut on_state) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!("Startup failed: {}", err);
                on_state(&LoadingState::failed(&err));
                Err(err)
            }
        }
    }

    fn run_stages<F>(&mut self, on_state: &mut F) -> Result<BootstrapOutcome>
    where
        F: FnMut(&LoadingState),
    {
        on_state(&LoadingState::new(Stage::Checking, 0, "Checking corpus"));
        if self.corpus.len() == 0 {
            return Err(Error::EmptyCorpus);
        }
        if let Some(generator) = self.generator {
            generator.check_available().map_err(Error::generation)?;
        }
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled());
        }

        on_state(&LoadingState::new(Stage::Storage, 10, "Opening chunk store"));
        self.store.initialize()?;
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled());
        }

        on_state(&LoadingState::new(
            Stage::Embeddings,
            20,
            format!("Loading embedding model {}", self.embedder.model_id()),
        ));
        let dimension = self
            .embedder
            .embed_one("warmup")
            .map_err(|e| Error::embedding("warmup", e))?
            .len();
        debug!(model = self.embedder.model_id(), dimension, "embedder warmed up");
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled());
        }

        on_state(&LoadingState::new(Stage::Chunks, CHUNKS_START, "Checking corpus"));
        let corpus_fingerprint = self.corpus.fingerprint();
        let reloaded = match self.reload_reason(&corpus_fingerprint, dimension)? {
            Some(reason) => {
                info!(reason, "reloading corpus");
                match self.load_chunks(dimension, on_state) {
                    Ok(_) => true,
                    Err(_) if self.cancel.is_cancelled() => return Ok(self.cancelled()),
                    Err(err) => return Err(err),
                }
            }
            None => {
                debug!("corpus already current");
                false
            }
        };
        let chunks = self.store.count()?;
        on_state(&LoadingState::new(
            Stage::Chunks,
            CHUNKS_END,
            format!("{} chunks ready", chunks),
        ));
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled());
        }

        if let Some(generator) = self.generator {
            on_state(&LoadingState::new(
                Stage::Generation,
                90,
                format!("Generation model {} ready", generator.model_id()),
            ));
        }

        on_state(&LoadingState::new(Stage::Ready, 100, "Ready"));
        Ok(BootstrapOutcome::Ready { chunks, reloaded })
    }

    fn cancelled(&self) -> BootstrapOutcome {
        info!("startup cancelled");
        BootstrapOutcome::Cancelled
    }

    /// Why the corpus must be reloaded, or `None` if the store is current.
    fn reload_reason(&self, corpus_fingerprint: &str, dimension: usize) -> Result<Option<&'static str>> {
        if self.force {
            return Ok(Some("forced"));
        }
        if !self.store.is_populated()? {
            return Ok(Some("store not populated for this corpus version"));
        }
        if self.store.fingerprint()?.as_deref() != Some(corpus_fingerprint) {
            return Ok(Some("corpus content changed"));
        }
        if self.store.dimension()? != Some(dimension) {
            return Ok(Some("embedding dimension changed"));
        }
        Ok(None)
    }

    fn load_chunks<F>(&mut self, dimension: usize, on_state: &mut F) -> Result<usize>
    where
        F: FnMut(&LoadingState),
    {
        let Self {
            store,
            embedder,
            corpus,
            cancel,
            ..
        } = self;

        let mut report = |current: usize, total: usize| {
            on_state(&LoadingState::new(
                Stage::Chunks,
                chunk_progress(current, total),
                format!("Embedding chunk {} of {}", current, total),
            ));
        };

        match corpus {
            CorpusSource::Raw(raw) => store.load_corpus_with_progress(
                raw.as_slice(),
                |text| {
                    if cancel.is_cancelled() {
                        anyhow::bail!("cancelled");
                    }
                    embedder.embed_one(text)
                },
                report,
            ),
            CorpusSource::Precomputed(chunks) => {
                if let Some(chunk) = chunks.iter().find(|c| c.embedding.len() != dimension) {
                    return Err(Error::DimensionMismatch {
                        expected: dimension,
                        actual: chunk.embedding.len(),
                    });
                }
                store.import_chunks(chunks.as_slice(), &mut report)
            }
        }
    }
}

fn chunk_progress(current: usize, total: usize) -> u8 {
    if total == 0 {
        return CHUNKS_END;
    }
    let span = (CHUNKS_END - CHUNKS_START) as usize;
    CHUNKS_START + (span * current.min(total) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::ChunkMetadata;
    use crate::embedding::HashingProvider;
    use crate::generation::{EchoGenerator, GenerationRequest, TokenStream};

    struct CountingEmbedder {
        inner: HashingProvider,
        calls: usize,
        cancel_after: Option<(usize, CancellationFlag)>,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                inner: HashingProvider::new(32),
                calls: 0,
                cancel_after: None,
            }
        }
    }

    impl EmbeddingProvider for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn embed_texts(&mut self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls += texts.len();
            if let Some((limit, flag)) = &self.cancel_after {
                if self.calls >= *limit {
                    flag.cancel();
                }
            }
            self.inner.embed_texts(texts)
        }
    }

    struct UnavailableGenerator;

    impl GenerationProvider for UnavailableGenerator {
        fn model_id(&self) -> &str {
            "missing"
        }

        fn check_available(&self) -> anyhow::Result<()> {
            anyhow::bail!("model file not found")
        }

        fn generate(&mut self, _request: &GenerationRequest<'_>) -> anyhow::Result<TokenStream<'_>> {
            anyhow::bail!("unreachable")
        }
    }

    fn corpus(contents: &[&str]) -> Vec<RawChunk> {
        contents
            .iter()
            .enumerate()
            .map(|(i, content)| RawChunk {
                id: format!("chunk-{}", i),
                content: content.to_string(),
                metadata: ChunkMetadata {
                    source: "Behaviour Policy".to_string(),
                    section: format!("Section {}", i),
                    chunk_index: i as u32,
                },
            })
            .collect()
    }

    fn store() -> ChunkStore {
        ChunkStore::in_memory("v1".into())
    }

    #[test]
    fn ready_path_reports_every_stage() {
        let mut store = store();
        let mut embedder = CountingEmbedder::new();
        let generator = EchoGenerator::new();
        let mut states = Vec::new();

        let outcome = Bootstrap::new(
            &mut store,
            &mut embedder,
            CorpusSource::Raw(corpus(&["uniform", "detentions"])),
        )
        .with_generator(&generator)
        .run(|s| states.push(s.clone()))
        .unwrap();

        assert_eq!(
            outcome,
            BootstrapOutcome::Ready {
                chunks: 2,
                reloaded: true
            }
        );
        let mut stages: Vec<Stage> = states.iter().map(|s| s.stage).collect();
        stages.dedup();
        assert_eq!(
            stages,
            vec![
                Stage::Checking,
                Stage::Storage,
                Stage::Embeddings,
                Stage::Chunks,
                Stage::Generation,
                Stage::Ready
            ]
        );
        assert!(states.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert_eq!(states.last().unwrap().progress, 100);
        assert!(store.is_populated().unwrap());
    }

    #[test]
    fn generation_stage_is_skipped_without_generator() {
        let mut store = store();
        let mut embedder = CountingEmbedder::new();
        let mut stages = Vec::new();

        Bootstrap::new(&mut store, &mut embedder, CorpusSource::Raw(corpus(&["a"])))
            .run(|s| stages.push(s.stage))
            .unwrap();

        assert!(!stages.contains(&Stage::Generation));
        assert_eq!(stages.last(), Some(&Stage::Ready));
    }

    #[test]
    fn current_store_is_not_reembedded() {
        let mut store = store();
        let records = corpus(&["uniform", "detentions"]);

        let mut first = CountingEmbedder::new();
        Bootstrap::new(&mut store, &mut first, CorpusSource::Raw(records.clone()))
            .run(|_| {})
            .unwrap();
        assert_eq!(first.calls, 3);

        let mut second = CountingEmbedder::new();
        let outcome = Bootstrap::new(&mut store, &mut second, CorpusSource::Raw(records))
            .run(|_| {})
            .unwrap();
        assert_eq!(
            outcome,
            BootstrapOutcome::Ready {
                chunks: 2,
                reloaded: false
            }
        );
        // warm-up only
        assert_eq!(second.calls, 1);
    }

    #[test]
    fn changed_content_under_same_version_reloads() {
        let mut store = store();
        let mut embedder = CountingEmbedder::new();
        Bootstrap::new(&mut store, &mut embedder, CorpusSource::Raw(corpus(&["old text"])))
            .run(|_| {})
            .unwrap();

        let outcome = Bootstrap::new(&mut store, &mut embedder, CorpusSource::Raw(corpus(&["new text"])))
            .run(|_| {})
            .unwrap();
        assert_eq!(
            outcome,
            BootstrapOutcome::Ready {
                chunks: 1,
                reloaded: true
            }
        );
        assert_eq!(store.get_all().unwrap()[0].content, "new text");
    }

    #[test]
    fn force_reloads_current_store() {
        let mut store = store();
        let mut embedder = CountingEmbedder::new();
        let records = corpus(&["a", "b"]);
        Bootstrap::new(&mut store, &mut embedder, CorpusSource::Raw(records.clone()))
            .run(|_| {})
            .unwrap();

        let outcome = Bootstrap::new(&mut store, &mut embedder, CorpusSource::Raw(records))
            .force_reload(true)
            .run(|_| {})
            .unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Ready { reloaded: true, .. }));
    }

    #[test]
    fn empty_corpus_emits_error_state() {
        let mut store = store();
        let mut embedder = CountingEmbedder::new();
        let mut states = Vec::new();

        let err = Bootstrap::new(&mut store, &mut embedder, CorpusSource::Raw(Vec::new()))
            .run(|s| states.push(s.clone()))
            .unwrap_err();

        assert!(matches!(err, Error::EmptyCorpus));
        let last = states.last().unwrap();
        assert_eq!(last.stage, Stage::Error);
        assert_eq!(last.error.as_deref(), Some("corpus contains no chunks"));
        assert!(!store.is_initialized());
    }

    #[test]
    fn unavailable_generator_fails_before_storage() {
        let mut store = store();
        let mut embedder = CountingEmbedder::new();
        let generator = UnavailableGenerator;

        let err = Bootstrap::new(&mut store, &mut embedder, CorpusSource::Raw(corpus(&["a"])))
            .with_generator(&generator)
            .run(|_| {})
            .unwrap_err();

        assert!(matches!(err, Error::GenerationFailure { .. }));
        assert!(!store.is_initialized());
    }

    #[test]
    fn cancel_before_start_stops_after_checking() {
        let mut store = store();
        let mut embedder = CountingEmbedder::new();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let outcome = Bootstrap::new(&mut store, &mut embedder, CorpusSource::Raw(corpus(&["a"])))
            .with_cancellation(cancel)
            .run(|_| {})
            .unwrap();

        assert_eq!(outcome, BootstrapOutcome::Cancelled);
        assert!(!store.is_initialized());
        assert_eq!(embedder.calls, 0);
    }

    #[test]
    fn cancel_mid_load_leaves_store_unpopulated() {
        let mut store = store();
        let cancel = CancellationFlag::new();
        let mut embedder = CountingEmbedder::new();
        // warm-up plus one record
        embedder.cancel_after = Some((2, cancel.clone()));

        let outcome = Bootstrap::new(
            &mut store,
            &mut embedder,
            CorpusSource::Raw(corpus(&["a", "b", "c", "d"])),
        )
        .with_cancellation(cancel)
        .run(|_| {})
        .unwrap();

        assert_eq!(outcome, BootstrapOutcome::Cancelled);
        assert_eq!(embedder.calls, 2);
        assert_eq!(store.count().unwrap(), 0);
        assert!(!store.is_populated().unwrap());
    }

    #[test]
    fn precomputed_corpus_with_wrong_dimension_is_rejected() {
        let mut store = store();
        let mut embedder = CountingEmbedder::new();
        let chunks: Vec<Chunk> = corpus(&["a"])
            .iter()
            .map(|raw| Chunk::from_raw(raw, vec![1.0, 0.0, 0.0]))
            .collect();

        let err = Bootstrap::new(&mut store, &mut embedder, CorpusSource::Precomputed(chunks))
            .run(|_| {})
            .unwrap_err();

        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 32,
                actual: 3
            }
        ));
    }

    #[test]
    fn chunk_progress_spans_its_band() {
        assert_eq!(chunk_progress(0, 10), CHUNKS_START);
        assert_eq!(chunk_progress(10, 10), CHUNKS_END);
        assert_eq!(chunk_progress(5, 10), 60);
    }
}
