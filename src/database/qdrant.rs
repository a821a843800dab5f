use super::{IndexRecord, ScoredChunk, VectorIndex};
use crate::chunking::TextChunk;
use crate::config::QdrantConfig;
use crate::document::Locator;
use crate::embeddings::Embedding;
use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, UpsertPointsBuilder, Value, VectorParams,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Low bits of a sequence number left for the position within one batch
const BATCH_BITS: u32 = 20;

/// Qdrant-backed vector index holding every document in one collection
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    /// Lowest sequence number not yet handed out by this process
    next_sequence: AtomicU64,
}

impl QdrantIndex {
    /// Create a new Qdrant client
    pub fn new(config: &QdrantConfig) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = &config.api_key {
            config_builder.api_key(api_key.clone())
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .map_err(|e| RagError::index(BACKEND, format!("failed to build client: {}", e)))?;

        Ok(QdrantIndex {
            client,
            collection: config.collection.clone(),
            next_sequence: AtomicU64::new(0),
        })
    }

    /// Check if the collection exists
    pub async fn collection_exists(&self) -> Result<bool> {
        match self.client.collection_info(&self.collection).await {
            Ok(_) => Ok(true),
            Err(qdrant_client::QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(false)
            }
            Err(e) => Err(RagError::index(
                BACKEND,
                format!("failed to check collection existence: {}", e),
            )),
        }
    }

    /// Create the collection on first use, sized to the embedding model
    async fn ensure_collection(&self, dimensions: u64) -> Result<()> {
        if self.collection_exists().await? {
            return Ok(());
        }

        info!(
            "Creating collection {} with {} dimensions",
            self.collection, dimensions
        );
        let create_collection = CreateCollectionBuilder::new(self.collection.clone())
            .vectors_config(VectorParams {
                size: dimensions,
                distance: Distance::Cosine.into(),
                ..Default::default()
            });

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| {
                RagError::index(
                    BACKEND,
                    format!("failed to create collection {}: {}", self.collection, e),
                )
            })?;

        Ok(())
    }
}

/// First of `len` consecutive insertion sequence numbers.
///
/// Sequences start from the wall clock in milliseconds shifted past
/// `BATCH_BITS`, so they keep growing across processes sharing a collection,
/// and never repeat within this one.
fn reserve_sequences(next: &AtomicU64, clock_millis: u64, len: u64) -> u64 {
    let floor = clock_millis << BATCH_BITS;
    let previous = next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            Some(current.max(floor) + len)
        })
        .unwrap_or_else(|current| current);
    previous.max(floor)
}

fn clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Deterministic point ID so re-ingesting a chunk overwrites it
fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, chunk_id.as_bytes()).to_string()
}

fn to_payload(chunk: &TextChunk, sequence: u64) -> HashMap<String, Value> {
    let mut payload = HashMap::new();
    payload.insert("chunk_id".to_string(), Value::from(chunk.chunk_id.clone()));
    payload.insert("document_id".to_string(), Value::from(chunk.document_id.clone()));
    payload.insert("document_name".to_string(), Value::from(chunk.document_name.clone()));
    payload.insert("chunk_index".to_string(), Value::from(chunk.index as i64));
    payload.insert("start".to_string(), Value::from(chunk.start as i64));
    payload.insert("end".to_string(), Value::from(chunk.end as i64));
    payload.insert("locator".to_string(), Value::from(chunk.locator.to_string()));
    payload.insert("text".to_string(), Value::from(chunk.text.clone()));
    payload.insert("sequence".to_string(), Value::from(sequence as i64));
    payload
}

/// Convert a stored payload back into a chunk; `None` for foreign points
fn from_payload(payload: &HashMap<String, Value>) -> Option<(TextChunk, u64)> {
    let get_str = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());
    let get_int = |key: &str| payload.get(key).and_then(|v| v.as_integer());

    let chunk = TextChunk {
        chunk_id: get_str("chunk_id")?,
        document_id: get_str("document_id")?,
        document_name: get_str("document_name").unwrap_or_default(),
        index: get_int("chunk_index").unwrap_or(0) as usize,
        start: get_int("start").unwrap_or(0) as usize,
        end: get_int("end").unwrap_or(0) as usize,
        locator: get_str("locator")
            .and_then(|l| l.parse::<Locator>().ok())
            .unwrap_or(Locator::Whole),
        text: get_str("text")?,
    };
    let sequence = get_int("sequence").unwrap_or(0) as u64;
    Some((chunk, sequence))
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn location(&self) -> String {
        self.collection.clone()
    }

    async fn add(&self, records: Vec<IndexRecord>) -> Result<usize> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        self.ensure_collection(first.embedding.dimensions() as u64)
            .await?;

        let stored = records.len();
        let base_sequence = reserve_sequences(&self.next_sequence, clock_millis(), stored as u64);

        // Convert chunks and embeddings to points
        let points = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                let payload = Payload::from(to_payload(&record.chunk, base_sequence + i as u64));
                PointStruct::new(
                    point_id(&record.chunk.chunk_id),
                    record.embedding.values,
                    payload,
                )
            })
            .collect::<Vec<PointStruct>>();

        let upsert_request = UpsertPointsBuilder::new(self.collection.clone(), points)
            .wait(true)
            .build();

        self.client.upsert_points(upsert_request).await.map_err(|e| {
            RagError::index(
                BACKEND,
                format!("failed to upsert points in {}: {}", self.collection, e),
            )
        })?;

        debug!("Upserted {} points into {}", stored, self.collection);
        Ok(stored)
    }

    async fn remove_document(&self, document_id: &str) -> Result<u64> {
        if !self.collection_exists().await? {
            return Ok(0);
        }

        let filter = Filter::must([Condition::matches("document_id", document_id.to_string())]);
        let existing = self
            .client
            .count(
                CountPointsBuilder::new(self.collection.clone())
                    .filter(filter.clone())
                    .exact(true),
            )
            .await
            .map_err(|e| RagError::index(BACKEND, format!("failed to count points: {}", e)))?
            .result
            .map(|r| r.count)
            .unwrap_or(0);
        if existing == 0 {
            return Ok(0);
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(self.collection.clone())
                    .points(filter)
                    .wait(true),
            )
            .await
            .map_err(|e| {
                RagError::index(
                    BACKEND,
                    format!("failed to delete points of {}: {}", document_id, e),
                )
            })?;

        debug!("Deleted {} points of {} from {}", existing, document_id, self.collection);
        Ok(existing)
    }

    async fn query(&self, embedding: &Embedding, limit: usize) -> Result<Vec<ScoredChunk>> {
        use qdrant_client::qdrant::{with_payload_selector, SearchPoints, WithPayloadSelector};

        if !self.collection_exists().await? {
            return Ok(Vec::new());
        }

        let search_request = SearchPoints {
            collection_name: self.collection.clone(),
            vector: embedding.values.clone(),
            limit: limit as u64,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(with_payload_selector::SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .map_err(|e| {
                RagError::index(
                    BACKEND,
                    format!("failed to search {}: {}", self.collection, e),
                )
            })?;

        let hits = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let parsed = from_payload(&scored_point.payload);
                if parsed.is_none() {
                    warn!("Skipping point without chunk payload in {}", self.collection);
                }
                parsed.map(|(chunk, sequence)| ScoredChunk {
                    chunk,
                    score: scored_point.score,
                    sequence,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn count(&self) -> Result<u64> {
        if !self.collection_exists().await? {
            return Ok(0);
        }

        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection.clone()).exact(true))
            .await
            .map_err(|e| RagError::index(BACKEND, format!("failed to count points: {}", e)))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    async fn clear(&self) -> Result<()> {
        if !self.collection_exists().await? {
            return Ok(());
        }

        self.client
            .delete_collection(self.collection.clone())
            .await
            .map_err(|e| {
                RagError::index(
                    BACKEND,
                    format!("failed to delete collection {}: {}", self.collection, e),
                )
            })?;

        info!("Deleted collection {}", self.collection);
        Ok(())
    }
}
