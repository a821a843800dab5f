//! Vector index abstraction and its backends.
//!
//! The index stores `(embedding, chunk)` pairs and answers nearest-neighbour
//! queries by cosine similarity. Search itself is delegated to the backend.

use crate::chunking::TextChunk;
use crate::config::BackendConfig;
use crate::embeddings::Embedding;
use crate::error::Result;
use async_trait::async_trait;

pub mod local;
pub mod qdrant;

pub use local::LocalIndex;
pub use qdrant::QdrantIndex;

/// A chunk and its embedding, ready to be stored
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub chunk: TextChunk,
    pub embedding: Embedding,
}

/// A stored chunk returned by a similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: TextChunk,
    /// Cosine similarity to the query, higher is closer
    pub score: f32,
    /// Insertion order within the index, used to break score ties
    pub sequence: u64,
}

/// Summary of what the index currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub backend: &'static str,
    pub location: String,
    pub chunk_count: u64,
}

/// Storage for chunk embeddings with similarity search
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Collection name or file path
    fn location(&self) -> String;

    /// Store records, replacing any with the same chunk ID. Returns the number stored.
    async fn add(&self, records: Vec<IndexRecord>) -> Result<usize>;

    /// Remove every chunk of one document. Returns the number removed.
    async fn remove_document(&self, document_id: &str) -> Result<u64>;

    /// The `limit` most similar chunks, highest score first
    async fn query(&self, embedding: &Embedding, limit: usize) -> Result<Vec<ScoredChunk>>;

    /// Number of stored chunks
    async fn count(&self) -> Result<u64>;

    /// Remove every stored chunk
    async fn clear(&self) -> Result<()>;

    async fn info(&self) -> Result<IndexInfo> {
        Ok(IndexInfo {
            backend: self.backend_name(),
            location: self.location(),
            chunk_count: self.count().await?,
        })
    }
}

/// Open the index named by the configuration
pub fn open_index(config: &BackendConfig) -> Result<Box<dyn VectorIndex>> {
    match config {
        BackendConfig::Local { path } => Ok(Box::new(LocalIndex::open(path)?)),
        BackendConfig::Qdrant(qdrant) => Ok(Box::new(QdrantIndex::new(qdrant)?)),
    }
}
