use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Embedding { values }
    }

    pub fn dimensions(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity, 0.0 when either vector has zero magnitude
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        let dot: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum();
        let norm_a: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = other.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

/// A service that turns text into embeddings
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in input order
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::EmbeddingService("service returned no embedding".into()))
    }
}

/// Embed `texts` in requests of at most `batch_size` inputs.
///
/// Fails if the service returns a different number of vectors than it was
/// given, since the one-to-one pairing with chunks would be lost.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Embedding>> {
    let mut embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        debug!("Embedding batch of {} texts", batch.len());
        let batch_embeddings = embedder.embed_batch(batch).await?;
        if batch_embeddings.len() != batch.len() {
            return Err(RagError::EmbeddingService(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                batch_embeddings.len()
            )));
        }
        embeddings.extend(batch_embeddings);
    }

    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records batch sizes and returns the text length as a 1-d vector
    struct LengthEmbedder {
        batches: Mutex<Vec<usize>>,
        drop_last: bool,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            self.batches.lock().unwrap().push(texts.len());
            let mut out: Vec<Embedding> = texts
                .iter()
                .map(|t| Embedding::new(vec![t.len() as f32]))
                .collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let embedder = LengthEmbedder {
            batches: Mutex::new(Vec::new()),
            drop_last: false,
        };
        let texts = ["a", "bb", "ccc", "dddd", "eeeee"];

        let embeddings = embed_in_batches(&embedder, &texts, 2).await.unwrap();
        let lengths: Vec<f32> = embeddings.iter().map(|e| e.values[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(*embedder.batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_service_error() {
        let embedder = LengthEmbedder {
            batches: Mutex::new(Vec::new()),
            drop_last: true,
        };
        let err = embed_in_batches(&embedder, &["a", "b"], 10).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingService(_)));
    }

    #[test]
    fn test_cosine_similarity() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 2.0]);
        let c = Embedding::new(vec![3.0, 0.0]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
        assert!((a.cosine_similarity(&c) - 1.0).abs() < 1e-6);
        assert_eq!(a.cosine_similarity(&Embedding::new(vec![0.0, 0.0])), 0.0);
    }
}
