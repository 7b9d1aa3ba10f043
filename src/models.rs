//! Core data models used throughout the RAG pipeline.
//!
//! These types represent the per-file ingestion records, chunks, index
//! entries, and status summaries that flow between the index service,
//! generation client, and query orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-file ingestion record, keyed by filename in the content store.
///
/// Created on first successful ingest and updated whenever a re-ingest
/// detects a changed hash, size, or mtime. Never implicitly deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// SHA-256 of the raw file contents, hex-encoded.
    pub content_hash: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
    /// Filesystem mtime, unix seconds.
    pub last_modified: i64,
}

/// An ephemeral text span produced during ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// Citation metadata attached to every index entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// Source filename (the deduplication key for citations).
    pub source: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
}

/// Embedded chunk as stored in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A retrieval hit: chunk text, similarity score, and citation metadata.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Reference to a source document in a query answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub filename: String,
    /// Per-chunk metadata, populated when the caller asked for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ChunkMetadata>,
}

/// Retrieved context assembled for prompt composition.
#[derive(Debug, Clone)]
pub struct ContextSections {
    /// Chunk texts joined with blank lines, in rank order.
    pub text: String,
    /// Sources deduplicated by filename, first-seen order preserved.
    pub sources: Vec<SourceRef>,
    /// Similarity score per retrieved chunk, rank order.
    pub scores: Vec<f32>,
}

impl ContextSections {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Aggregate health of the query path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Index ready and generation backend available.
    Healthy,
    /// Exactly one of the two is ready.
    Degraded,
    /// Neither is ready.
    Unhealthy,
}

/// Snapshot of service readiness, cached by the orchestrator with a TTL.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub overall: HealthState,
    pub index_ready: bool,
    pub generation_available: bool,
    pub documents_ingested: usize,
    pub checked_at: DateTime<Utc>,
}

impl ServiceStatus {
    pub fn from_parts(
        index_ready: bool,
        generation_available: bool,
        documents_ingested: usize,
    ) -> Self {
        let overall = match (index_ready, generation_available) {
            (true, true) => HealthState::Healthy,
            (false, false) => HealthState::Unhealthy,
            _ => HealthState::Degraded,
        };
        ServiceStatus {
            overall,
            index_ready,
            generation_available,
            documents_ingested,
            checked_at: Utc::now(),
        }
    }
}

/// Counters reported by the index service.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub total_bytes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub embedding_model: String,
}
