//! docqa-retriever
//!
//! Ties the loader, splitter, embedder, index and store together. A
//! [`Retriever`] owns one index and its chunks for the life of the process;
//! every mutation replaces both wholesale.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use docqa_core::config::Settings;
use docqa_core::loader::Loader;
use docqa_core::splitter::{Splitter, SplitterConfig};
use docqa_core::traits::Embedder;
use docqa_core::types::{Chunk, RetrievedChunk};
use docqa_vector::{FlatIndex, Store};

pub mod answer;
pub mod history;

pub use answer::{Answer, Generator, LocalSummaryGenerator, MistralGenerator, QueryProcessor};
pub use history::{ChatRecord, HistorySink, JsonlHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrieverState {
    /// Nothing built or loaded yet.
    Empty,
    /// Built by `process_documents` in this process, and persisted.
    Indexed,
    /// Loaded from a previous run.
    Ready,
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub docs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub recursive: bool,
    pub splitter: SplitterConfig,
    pub embed_batch_size: usize,
    pub top_k: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("docs"),
            data_dir: PathBuf::from("data"),
            recursive: false,
            splitter: SplitterConfig::default(),
            embed_batch_size: 32,
            top_k: 3,
        }
    }
}

impl RetrieverConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            docs_dir: settings.paths.docs_dir(),
            data_dir: settings.paths.data_dir(),
            recursive: settings.paths.recursive,
            splitter: settings.chunking,
            embed_batch_size: settings.embedding.batch_size,
            top_k: settings.retrieval.top_k,
        }
    }
}

/// Outcome of one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub sources: usize,
    /// Chunks with more words than the embedder's `max_len`; the model only
    /// sees their beginning.
    pub truncated: usize,
    /// Nothing was found to index; the previous state was kept.
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieverStats {
    pub chunks: usize,
    pub sources: usize,
}

pub struct Retriever {
    embedder: Box<dyn Embedder>,
    config: RetrieverConfig,
    loader: Loader,
    splitter: Splitter,
    store: Store,
    state: RetrieverState,
    index: FlatIndex,
    chunks: Vec<Chunk>,
}

impl Retriever {
    pub fn new(embedder: Box<dyn Embedder>, config: RetrieverConfig) -> Result<Self> {
        if config.embed_batch_size == 0 {
            bail!("embed_batch_size must be at least 1");
        }
        let splitter = Splitter::new(config.splitter).context("invalid splitter configuration")?;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
        Ok(Self {
            loader: Loader::new().recursive(config.recursive),
            store: Store::new(&config.data_dir),
            splitter,
            embedder,
            config,
            state: RetrieverState::Empty,
            index: FlatIndex::new(),
            chunks: Vec::new(),
        })
    }

    pub fn config(&self) -> &RetrieverConfig { &self.config }
    pub fn state(&self) -> RetrieverState { self.state }
    pub fn chunks(&self) -> &[Chunk] { &self.chunks }
    pub fn index(&self) -> &FlatIndex { &self.index }
    pub fn docs_dir(&self) -> &Path { &self.config.docs_dir }

    pub fn stats(&self) -> RetrieverStats {
        RetrieverStats { chunks: self.chunks.len(), sources: count_sources(&self.chunks) }
    }

    /// Load, split, embed, index and persist everything in the document
    /// directory, then make it the current state.
    ///
    /// On any error the previous state is kept. An empty directory is not an
    /// error: the report comes back with `skipped` set.
    pub fn process_documents(&mut self) -> Result<IngestReport> {
        let start = Instant::now();
        let documents = self.loader.load_directory(&self.config.docs_dir);
        let chunks = self.splitter.split_documents(&documents);
        if chunks.is_empty() {
            warn!(dir = %self.config.docs_dir.display(), "no chunks produced, keeping current index");
            return Ok(IngestReport { documents: documents.len(), skipped: true, ..IngestReport::default() });
        }
        info!(documents = documents.len(), chunks = chunks.len(), "split documents");

        let truncated = self.count_truncated(&chunks);
        let vectors = self.embed_chunks(&chunks)?;
        let index = FlatIndex::rebuild(&vectors).context("building index")?;
        self.store.save(&index, &chunks).context("saving index")?;

        let report = IngestReport {
            documents: documents.len(),
            chunks: chunks.len(),
            sources: count_sources(&chunks),
            truncated,
            skipped: false,
        };
        self.index = index;
        self.chunks = chunks;
        self.state = RetrieverState::Indexed;
        info!(chunks = report.chunks, sources = report.sources, elapsed = ?start.elapsed(), "ingestion complete");
        Ok(report)
    }

    /// Every word is at least one token, so a chunk with more words than
    /// `max_len` is cut short by the embedder.
    fn count_truncated(&self, chunks: &[Chunk]) -> usize {
        let max_len = self.embedder.max_len();
        let truncated = chunks
            .iter()
            .filter(|c| c.text.split_whitespace().nth(max_len).is_some())
            .inspect(|c| debug!(source = %c.source, position = c.position, "chunk exceeds embedder input length"))
            .count();
        if truncated > 0 {
            warn!(truncated, max_len, "some chunks are longer than the embedder reads");
        }
        truncated
    }

    fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let dim = self.embedder.dim();
        let mut vectors = Vec::with_capacity(chunks.len());
        for (n, batch) in chunks.chunks(self.config.embed_batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self.embedder.embed_batch(&texts).with_context(|| format!("embedding batch {n}"))?;
            if embedded.len() != texts.len() {
                bail!("embedder returned {} vectors for {} texts", embedded.len(), texts.len());
            }
            if let Some(v) = embedded.iter().find(|v| v.len() != dim) {
                bail!("embedder returned a {}-dimensional vector, expected {dim}", v.len());
            }
            debug!(batch = n, size = texts.len(), "embedded batch");
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Replace the current state with the persisted one. Returns `false`
    /// and keeps the current state when nothing usable is on disk.
    pub fn load_processed_data(&mut self) -> bool {
        let (index, chunks) = match self.store.load() {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                debug!(dir = %self.config.data_dir.display(), "no processed data to load");
                return false;
            }
            Err(e) => {
                warn!(dir = %self.config.data_dir.display(), error = %e, "rejecting persisted index");
                return false;
            }
        };
        if let Some(dim) = index.dim().filter(|d| *d != self.embedder.dim()) {
            warn!(stored = dim, embedder = self.embedder.dim(), "persisted index was built with another embedder");
            return false;
        }
        info!(chunks = chunks.len(), "loaded processed data");
        self.index = index;
        self.chunks = chunks;
        self.state = RetrieverState::Ready;
        true
    }

    /// The `k` chunks nearest to `query`, nearest first. Empty until
    /// something has been indexed or loaded.
    pub fn get_relevant_chunks(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if self.state == RetrieverState::Empty || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed_batch(&[query.to_string()])
            .context("embedding query")?
            .pop()
            .context("embedder returned no vector for the query")?;
        let hits = self.index.search(&query_vec, k)?;

        hits.into_iter()
            .map(|hit| {
                let chunk = self
                    .chunks
                    .get(hit.row)
                    .with_context(|| format!("index row {} has no chunk", hit.row))?;
                Ok(RetrievedChunk { content: chunk.text.clone(), source: chunk.source.clone(), distance: hit.distance })
            })
            .collect()
    }
}

fn count_sources(chunks: &[Chunk]) -> usize {
    chunks.iter().map(|c| c.source.as_str()).collect::<BTreeSet<_>>().len()
}
