use super::{IndexRecord, ScoredChunk, VectorIndex};
use crate::chunking::TextChunk;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const BACKEND: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    sequence: u64,
    chunk: TextChunk,
    embedding: Embedding,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    next_sequence: u64,
    entries: Vec<StoredEntry>,
}

/// Brute-force cosine index persisted as a JSON snapshot.
///
/// Without a path the index lives only in memory.
pub struct LocalIndex {
    path: Option<PathBuf>,
    state: RwLock<Snapshot>,
}

impl LocalIndex {
    /// Open the snapshot at `path`, starting empty if it does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| {
                RagError::index(
                    BACKEND,
                    format!("corrupt index file {}: {}", path.display(), e),
                )
            })?;
            info!(
                "Opened local index {} with {} chunks",
                path.display(),
                snapshot.entries.len()
            );
            snapshot
        } else {
            Snapshot::default()
        };

        Ok(LocalIndex {
            path: Some(path),
            state: RwLock::new(snapshot),
        })
    }

    pub fn in_memory() -> Self {
        LocalIndex {
            path: None,
            state: RwLock::new(Snapshot::default()),
        }
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(snapshot)
            .map_err(|e| RagError::index(BACKEND, format!("failed to serialize index: {}", e)))?;
        // Write then rename so a crash never leaves a truncated snapshot
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn location(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }

    async fn add(&self, records: Vec<IndexRecord>) -> Result<usize> {
        let mut state = self.state.write().await;

        let expected = state
            .entries
            .first()
            .map(|e| e.embedding.dimensions())
            .or_else(|| records.first().map(|r| r.embedding.dimensions()));
        if let Some(dimensions) = expected {
            if let Some(bad) = records.iter().find(|r| r.embedding.dimensions() != dimensions) {
                return Err(RagError::index(
                    BACKEND,
                    format!(
                        "embedding for {} has {} dimensions, index holds {}",
                        bad.chunk.chunk_id,
                        bad.embedding.dimensions(),
                        dimensions
                    ),
                ));
            }
        }

        let stored = records.len();
        // Memory only changes once the new snapshot is on disk
        let mut snapshot = (*state).clone();
        for record in records {
            let existing = snapshot
                .entries
                .iter()
                .position(|e| e.chunk.chunk_id == record.chunk.chunk_id);
            match existing {
                Some(i) => {
                    snapshot.entries[i].chunk = record.chunk;
                    snapshot.entries[i].embedding = record.embedding;
                }
                None => {
                    snapshot.entries.push(StoredEntry {
                        sequence: snapshot.next_sequence,
                        chunk: record.chunk,
                        embedding: record.embedding,
                    });
                    snapshot.next_sequence += 1;
                }
            }
        }

        self.persist(&snapshot)?;
        *state = snapshot;
        debug!("Stored {} chunks, index now holds {}", stored, state.entries.len());
        Ok(stored)
    }

    async fn remove_document(&self, document_id: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        if !state.entries.iter().any(|e| e.chunk.document_id == document_id) {
            return Ok(0);
        }

        let mut snapshot = (*state).clone();
        snapshot
            .entries
            .retain(|e| e.chunk.document_id != document_id);
        let removed = (before - snapshot.entries.len()) as u64;

        self.persist(&snapshot)?;
        *state = snapshot;
        debug!("Removed {} chunks of {}", removed, document_id);
        Ok(removed)
    }

    async fn query(&self, embedding: &Embedding, limit: usize) -> Result<Vec<ScoredChunk>> {
        let state = self.state.read().await;

        let mut scored: Vec<ScoredChunk> = state
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: entry.embedding.cosine_similarity(embedding),
                sequence: entry.sequence,
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.sequence.cmp(&b.sequence))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.state.read().await.entries.len() as u64)
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let empty = Snapshot::default();
        self.persist(&empty)?;
        *state = empty;
        info!("Cleared local index {}", self.location());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Locator;

    fn record(id: &str, values: Vec<f32>) -> IndexRecord {
        IndexRecord {
            chunk: TextChunk {
                chunk_id: id.to_string(),
                document_id: "doc.txt".to_string(),
                document_name: "doc.txt".to_string(),
                index: 0,
                start: 0,
                end: 4,
                locator: Locator::Whole,
                text: format!("text of {}", id),
            },
            embedding: Embedding::new(values),
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_score_then_insertion() {
        let index = LocalIndex::in_memory();
        index
            .add(vec![
                record("far", vec![0.0, 1.0]),
                record("tie-first", vec![1.0, 1.0]),
                record("near", vec![1.0, 0.0]),
                record("tie-second", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = index.query(&Embedding::new(vec![1.0, 0.0]), 3).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "tie-first", "tie-second"]);
    }

    #[tokio::test]
    async fn test_reingest_replaces_chunk() {
        let index = LocalIndex::in_memory();
        index.add(vec![record("a", vec![1.0, 0.0])]).await.unwrap();
        index.add(vec![record("a", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(index.count().await.unwrap(), 1);
        let hits = index.query(&Embedding::new(vec![0.0, 1.0]), 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].sequence, 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = LocalIndex::in_memory();
        index.add(vec![record("a", vec![1.0, 0.0])]).await.unwrap();
        let err = index
            .add(vec![record("b", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::VectorIndex { .. }));
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index").join("chunks.json");

        {
            let index = LocalIndex::open(&path).unwrap();
            index
                .add(vec![record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])])
                .await
                .unwrap();
        }

        let reopened = LocalIndex::open(&path).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
        let info = reopened.info().await.unwrap();
        assert_eq!(info.backend, "local");
        assert_eq!(info.chunk_count, 2);

        reopened.clear().await.unwrap();
        assert_eq!(LocalIndex::open(&path).unwrap().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_document_only_drops_its_chunks() {
        let index = LocalIndex::in_memory();
        let mut other = record("other.txt#0", vec![0.0, 1.0]);
        other.chunk.document_id = "other.txt".to_string();
        index
            .add(vec![
                record("doc.txt#0", vec![1.0, 0.0]),
                record("doc.txt#1", vec![1.0, 1.0]),
                other,
            ])
            .await
            .unwrap();

        assert_eq!(index.remove_document("doc.txt").await.unwrap(), 2);
        assert_eq!(index.remove_document("doc.txt").await.unwrap(), 0);
        let hits = index.query(&Embedding::new(vec![1.0, 0.0]), 5).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["other.txt#0"]);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let index = LocalIndex::open(blocker.join("chunks.json")).unwrap();
        assert!(index.add(vec![record("a", vec![1.0, 0.0])]).await.is_err());
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_clear_and_remove_keep_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("store");
        let index = LocalIndex::open(parent.join("chunks.json")).unwrap();
        index
            .add(vec![record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])])
            .await
            .unwrap();

        // Swap the directory for a plain file so every later write fails
        fs::remove_dir_all(&parent).unwrap();
        fs::write(&parent, "file").unwrap();

        assert!(index.remove_document("doc.txt").await.is_err());
        assert!(index.clear().await.is_err());
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[test]
    fn test_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            LocalIndex::open(&path),
            Err(RagError::VectorIndex { .. })
        ));
    }
}
