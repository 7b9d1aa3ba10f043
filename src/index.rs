//! Index service: ingestion with change detection, and cached search.
//!
//! Ingestion is idempotent per file. A document whose content hash matches
//! its stored record is skipped; a changed document has its old vectors
//! removed before the new ones are inserted, so each source is represented
//! exactly once. Ingestion for the same filename is serialized with a
//! per-file lock while distinct files proceed concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::cache::{LruTtlCache, SearchKey};
use crate::chunker::{self, ChunkPolicy};
use crate::config::Config;
use crate::content_store::ContentStore;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::loader::{self, ContentType};
use crate::models::{
    ChunkMetadata, ContextSections, DocumentRecord, IndexEntry, IndexStats, ScoredChunk,
};
use crate::vector_index::VectorIndex;

/// Outcome counts from a directory ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct IndexService {
    documents_root: PathBuf,
    chunking: crate::config::ChunkingConfig,
    retrieval: crate::config::RetrievalConfig,
    ingest_concurrency: usize,
    store: ContentStore,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    search_cache: LruTtlCache<SearchKey, Vec<ScoredChunk>>,
    file_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexService {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        let store = ContentStore::open(&config.index.metadata_file)?;
        Ok(IndexService {
            documents_root: config.documents.root.clone(),
            chunking: config.chunking.clone(),
            retrieval: config.retrieval.clone(),
            ingest_concurrency: config.index.ingest_concurrency.max(1),
            store,
            embedder,
            index,
            search_cache: LruTtlCache::new(
                config.retrieval.cache_capacity,
                Duration::from_secs(config.retrieval.cache_ttl_secs),
            ),
            file_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Ingest one file. Returns `Ok(true)` when the document was (re)indexed,
    /// `Ok(false)` when it was skipped as unsupported or unchanged.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn ingest_file(&self, path: &Path) -> Result<bool> {
        let Some(content_type) = loader::supported_extension(path) else {
            debug!("unsupported extension, skipping");
            return Ok(false);
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RagError::Input(format!("not a file path: {}", path.display())))?;

        let lock = self.file_lock(&filename);
        let _guard = lock.lock().await;

        let bytes = std::fs::read(path).map_err(|e| RagError::DocumentProcessing {
            file: filename.clone(),
            reason: format!("failed to read file: {e}"),
        })?;
        let content_hash = hex_digest(&bytes);

        let mtime = file_mtime(path);
        if let Some(record) = self.store.get(&filename) {
            if record.content_hash == content_hash
                && record.size_bytes == bytes.len() as u64
                && record.last_modified == mtime
            {
                debug!(filename, "content unchanged, skipping");
                return Ok(false);
            }
        }

        let text = loader::extract_from_bytes(&filename, &bytes, content_type)?;
        let policy = ChunkPolicy::for_content_type(content_type, &self.chunking);
        let chunks = chunker::split_text(&text, &policy);

        let ingested_at = Utc::now();
        let metadata = ChunkMetadata {
            source: filename.clone(),
            path: path.to_path_buf(),
            size_bytes: bytes.len() as u64,
            content_hash: content_hash.clone(),
            ingested_at,
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::Index(format!(
                "embedding count mismatch: {} texts, {} vectors",
                chunks.len(),
                embeddings.len()
            )));
        }

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry {
                id: format!("{}:{}:{}", filename, chunk.index, uuid::Uuid::new_v4()),
                text: chunk.text.clone(),
                embedding,
                metadata: metadata.clone(),
            })
            .collect();

        self.index.remove_source(&filename).await?;
        let chunk_count = entries.len();
        self.index.insert(entries).await?;
        self.index.persist().await?;

        self.store.upsert(DocumentRecord {
            filename: filename.clone(),
            path: path.to_path_buf(),
            size_bytes: bytes.len() as u64,
            content_hash,
            chunk_count,
            ingested_at,
            last_modified: mtime,
        })?;

        self.search_cache.invalidate_all();
        info!(filename, chunk_count, "document ingested");
        Ok(true)
    }

    /// Walk the documents root and ingest every supported file. Per-file
    /// failures are logged and counted, never fatal for the pass.
    #[instrument(skip(self))]
    pub async fn ingest_all(&self) -> Result<IngestReport> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.documents_root).follow_links(true) {
            let entry = entry.map_err(|e| {
                RagError::Index(format!(
                    "failed to walk {}: {e}",
                    self.documents_root.display()
                ))
            })?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        let results: Vec<(PathBuf, Result<bool>)> = stream::iter(paths)
            .map(|path| async move {
                let result = self.ingest_file(&path).await;
                (path, result)
            })
            .buffer_unordered(self.ingest_concurrency)
            .collect()
            .await;

        let mut report = IngestReport::default();
        for (path, result) in results {
            match result {
                Ok(true) => report.ingested += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ingestion failed for file");
                    report.failed += 1;
                }
            }
        }
        info!(
            ingested = report.ingested,
            skipped = report.skipped,
            failed = report.failed,
            "ingestion pass complete"
        );
        Ok(report)
    }

    /// Remove a document's record and vectors. Returns `false` when the
    /// filename was never ingested.
    #[instrument(skip(self))]
    pub async fn remove_document(&self, filename: &str) -> Result<bool> {
        let lock = self.file_lock(filename);
        let _guard = lock.lock().await;

        let removed = self.store.remove(filename)?;
        self.index.remove_source(filename).await?;
        self.index.persist().await?;
        if removed.is_some() {
            self.search_cache.invalidate_all();
        }
        Ok(removed.is_some())
    }

    /// Similarity search with the configured defaults.
    pub async fn search(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        self.search_with(
            query,
            self.retrieval.similarity_k,
            self.retrieval.score_threshold,
        )
        .await
    }

    /// Similarity search with explicit knobs. Results are cached per
    /// (query, k, threshold); any ingestion invalidates the cache.
    pub async fn search_with(
        &self,
        query: &str,
        k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Err(RagError::Input("query must not be empty".into()));
        }
        let key = SearchKey::new(query, k, threshold);
        if let Some(hit) = self.search_cache.get(&key) {
            debug!(k, "search cache hit");
            return Ok(hit);
        }

        let embedding = self.embedder.embed_one(query).await?;
        let results = self.index.search(&embedding, k, threshold).await?;
        self.search_cache.put(key, results.clone());
        Ok(results)
    }

    /// Search with per-call overrides falling back to the configured
    /// defaults.
    pub async fn search_opts(
        &self,
        query: &str,
        k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredChunk>> {
        self.search_with(
            query,
            k.unwrap_or(self.retrieval.similarity_k),
            threshold.or(self.retrieval.score_threshold),
        )
        .await
    }

    /// Retrieve and compose a bounded context block for a query, with
    /// sources deduplicated by filename for citation.
    pub async fn context_sections(
        &self,
        query: &str,
        k: Option<usize>,
        threshold: Option<f32>,
        max_context_chars: usize,
    ) -> Result<ContextSections> {
        let chunks = self.search_opts(query, k, threshold).await?;
        Ok(crate::prompt::compose_context(&chunks, max_context_chars))
    }

    pub fn clear_search_cache(&self) {
        self.search_cache.invalidate_all();
    }

    /// Ready means at least one document record exists and its vectors are
    /// actually present in the index.
    pub async fn is_ready(&self) -> bool {
        !self.store.is_empty() && self.index.len().await > 0
    }

    /// All ingested document records, sorted by filename.
    pub fn documents(&self) -> Vec<DocumentRecord> {
        self.store.list()
    }

    pub fn document_count(&self) -> usize {
        self.store.len()
    }

    pub async fn stats(&self) -> IndexStats {
        IndexStats {
            documents: self.store.len(),
            chunks: self.index.len().await,
            total_bytes: self.store.total_bytes(),
            cache_hits: self.search_cache.hits(),
            cache_misses: self.search_cache.misses(),
            embedding_model: self.embedder.model_name().to_string(),
        }
    }

    fn file_lock(&self, filename: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.file_locks.lock().unwrap();
        locks
            .entry(filename.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn file_mtime(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
