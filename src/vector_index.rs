//! Vector storage and similarity search behind a fixed trait.
//!
//! Every backend implements the full [`VectorIndex`] contract, including
//! `remove_source`; the index service relies on it unconditionally when a
//! document is re-ingested. The shipped backend is an in-memory brute-force
//! cosine index that persists to a JSON file.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RagError, Result};
use crate::models::{IndexEntry, ScoredChunk};

/// Storage contract for embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Add entries to the index.
    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Top-`k` entries by cosine similarity to `query`, best first.
    /// Entries scoring below `threshold` (when set) are dropped.
    async fn search(&self, query: &[f32], k: usize, threshold: Option<f32>)
        -> Result<Vec<ScoredChunk>>;

    /// Remove every entry whose metadata source matches `filename`.
    /// Returns the number of entries removed; zero is not an error.
    async fn remove_source(&self, filename: &str) -> Result<usize>;

    /// Number of stored entries.
    async fn len(&self) -> usize;

    /// Flush the current contents to durable storage.
    async fn persist(&self) -> Result<()>;
}

/// Brute-force cosine index held in memory, persisted as JSON.
pub struct InMemoryVectorIndex {
    path: PathBuf,
    entries: RwLock<Vec<IndexEntry>>,
}

impl InMemoryVectorIndex {
    /// Open the index at `persist_dir/index.json`, loading entries if the
    /// file exists.
    pub fn open(persist_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = persist_dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| RagError::Index(format!("failed to create {}: {e}", dir.display())))?;
        let path = dir.join("index.json");

        let entries = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| RagError::Index(format!("failed to read {}: {e}", path.display())))?;
            serde_json::from_str(&data)
                .map_err(|e| RagError::Index(format!("malformed index in {}: {e}", path.display())))?
        } else {
            Vec::new()
        };

        Ok(InMemoryVectorIndex {
            path,
            entries: RwLock::new(entries),
        })
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, mut new_entries: Vec<IndexEntry>) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.append(&mut new_entries);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().unwrap();
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|entry| ScoredChunk {
                text: entry.text.clone(),
                score: cosine_similarity(query, &entry.embedding),
                metadata: entry.metadata.clone(),
            })
            .filter(|s| threshold.map_or(true, |t| s.score >= t))
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn remove_source(&self, filename: &str) -> Result<usize> {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|entry| entry.metadata.source != filename);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(filename, removed, "removed stale index entries");
        }
        Ok(removed)
    }

    async fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    async fn persist(&self) -> Result<()> {
        let data = {
            let entries = self.entries.read().unwrap();
            serde_json::to_string(&*entries)
                .map_err(|e| RagError::Index(format!("failed to serialize index: {e}")))?
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .map_err(|e| RagError::Index(format!("failed to write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| RagError::Index(format!("failed to replace {}: {e}", self.path.display())))?;
        Ok(())
    }
}

/// Cosine similarity, 0.0 when either vector has zero magnitude or the
/// dimensions disagree.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use chrono::Utc;

    fn entry(source: &str, text: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            embedding,
            metadata: ChunkMetadata {
                source: source.to_string(),
                path: PathBuf::from(format!("/docs/{source}")),
                size_bytes: 10,
                content_hash: "h".to_string(),
                ingested_at: Utc::now(),
            },
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryVectorIndex::open(dir.path()).unwrap();
        index
            .insert(vec![
                entry("a.txt", "orthogonal", vec![0.0, 1.0]),
                entry("a.txt", "exact", vec![1.0, 0.0]),
                entry("b.txt", "close", vec![0.9, 0.1]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "exact");
        assert_eq!(hits[1].text, "close");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn threshold_filters_low_scores() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryVectorIndex::open(dir.path()).unwrap();
        index
            .insert(vec![
                entry("a.txt", "match", vec![1.0, 0.0]),
                entry("a.txt", "miss", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 5, Some(0.5)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "match");
    }

    #[tokio::test]
    async fn remove_source_drops_only_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryVectorIndex::open(dir.path()).unwrap();
        index
            .insert(vec![
                entry("a.txt", "one", vec![1.0]),
                entry("a.txt", "two", vec![1.0]),
                entry("b.txt", "three", vec![1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(index.remove_source("a.txt").await.unwrap(), 2);
        assert_eq!(index.len().await, 1);
        assert_eq!(index.remove_source("a.txt").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = InMemoryVectorIndex::open(dir.path()).unwrap();
            index
                .insert(vec![entry("a.txt", "kept", vec![0.5, 0.5])])
                .await
                .unwrap();
            index.persist().await.unwrap();
        }

        let reloaded = InMemoryVectorIndex::open(dir.path()).unwrap();
        assert_eq!(reloaded.len().await, 1);
        let hits = reloaded.search(&[0.5, 0.5], 1, None).await.unwrap();
        assert_eq!(hits[0].text, "kept");
    }
}
