//! Persistent record of ingested documents.
//!
//! Backs the change-detection check in the index service. The store keeps a
//! `filename -> DocumentRecord` map in memory and mirrors it to a JSON file
//! on every mutation. Before a write the current file is copied to a `.bak`
//! sibling, then the new contents land via a temp file and atomic rename,
//! so a crash mid-write never corrupts the record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::error::{RagError, Result};
use crate::models::DocumentRecord;

pub struct ContentStore {
    path: PathBuf,
    records: Mutex<HashMap<String, DocumentRecord>>,
}

impl ContentStore {
    /// Open the store, loading existing records from `path` if it exists.
    ///
    /// An unreadable or malformed file falls back to the `.bak` copy; if
    /// that is also unusable the store starts empty with a warning rather
    /// than refusing to ingest.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RagError::Index(format!("failed to create {}: {e}", parent.display())))?;
            }
        }

        let records = match Self::load_file(&path) {
            Ok(Some(records)) => records,
            Ok(None) => HashMap::new(),
            Err(primary) => {
                let backup = backup_path(&path);
                match Self::load_file(&backup) {
                    Ok(Some(records)) => {
                        warn!(
                            path = %path.display(),
                            error = %primary,
                            "metadata file unreadable, recovered from backup"
                        );
                        records
                    }
                    _ => {
                        warn!(
                            path = %path.display(),
                            error = %primary,
                            "metadata file unreadable and no usable backup, starting empty"
                        );
                        HashMap::new()
                    }
                }
            }
        };

        Ok(ContentStore {
            path,
            records: Mutex::new(records),
        })
    }

    fn load_file(path: &Path) -> Result<Option<HashMap<String, DocumentRecord>>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)
            .map_err(|e| RagError::Index(format!("failed to read {}: {e}", path.display())))?;
        let records = serde_json::from_str(&data)
            .map_err(|e| RagError::Index(format!("malformed metadata in {}: {e}", path.display())))?;
        Ok(Some(records))
    }

    /// Record for `filename`, if one exists.
    pub fn get(&self, filename: &str) -> Option<DocumentRecord> {
        self.records.lock().unwrap().get(filename).cloned()
    }

    /// Insert or replace the record for its filename and persist.
    pub fn upsert(&self, record: DocumentRecord) -> Result<()> {
        let snapshot = {
            let mut records = self.records.lock().unwrap();
            records.insert(record.filename.clone(), record);
            records.clone()
        };
        self.write_file(&snapshot)
    }

    /// Remove the record for `filename` and persist. Returns the removed
    /// record, or `None` if it was never ingested.
    pub fn remove(&self, filename: &str) -> Result<Option<DocumentRecord>> {
        let (removed, snapshot) = {
            let mut records = self.records.lock().unwrap();
            let removed = records.remove(filename);
            (removed, records.clone())
        };
        if removed.is_some() {
            self.write_file(&snapshot)?;
        }
        Ok(removed)
    }

    /// All records, sorted by filename.
    pub fn list(&self) -> Vec<DocumentRecord> {
        let mut records: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        records
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of recorded document sizes in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.records.lock().unwrap().values().map(|r| r.size_bytes).sum()
    }

    fn write_file(&self, records: &HashMap<String, DocumentRecord>) -> Result<()> {
        if self.path.exists() {
            if let Err(e) = std::fs::copy(&self.path, backup_path(&self.path)) {
                warn!(path = %self.path.display(), error = %e, "failed to write metadata backup");
            }
        }

        let data = serde_json::to_string_pretty(records)
            .map_err(|e| RagError::Index(format!("failed to serialize metadata: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)
            .map_err(|e| RagError::Index(format!("failed to write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| RagError::Index(format!("failed to replace {}: {e}", self.path.display())))?;
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    path.with_extension("json.bak")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(filename: &str, hash: &str) -> DocumentRecord {
        DocumentRecord {
            filename: filename.to_string(),
            path: PathBuf::from(format!("/docs/{filename}")),
            size_bytes: 42,
            content_hash: hash.to_string(),
            chunk_count: 3,
            ingested_at: Utc::now(),
            last_modified: 1_700_000_000,
        }
    }

    #[test]
    fn roundtrip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingested_files.json");

        let store = ContentStore::open(&path).unwrap();
        store.upsert(record("a.txt", "h1")).unwrap();
        store.upsert(record("b.md", "h2")).unwrap();
        drop(store);

        let reopened = ContentStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("a.txt").unwrap().content_hash, "h1");
    }

    #[test]
    fn upsert_replaces_by_filename() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path().join("meta.json")).unwrap();
        store.upsert(record("a.txt", "old")).unwrap();
        store.upsert(record("a.txt", "new")).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a.txt").unwrap().content_hash, "new");
    }

    #[test]
    fn remove_unknown_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path().join("meta.json")).unwrap();
        assert!(store.remove("ghost.txt").unwrap().is_none());
    }

    #[test]
    fn corrupt_file_recovers_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        let store = ContentStore::open(&path).unwrap();
        store.upsert(record("a.txt", "h1")).unwrap();
        // Second write creates the .bak from the first file.
        store.upsert(record("b.txt", "h2")).unwrap();
        drop(store);

        std::fs::write(&path, "{ not json").unwrap();
        let recovered = ContentStore::open(&path).unwrap();
        assert!(recovered.get("a.txt").is_some());
    }

    #[test]
    fn corrupt_file_without_backup_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, "garbage").unwrap();

        let store = ContentStore::open(&path).unwrap();
        assert!(store.is_empty());
    }
}
