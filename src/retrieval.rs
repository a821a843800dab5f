use crate::config::Settings;
use crate::database::{ScoredChunk, VectorIndex};
use crate::embeddings::{Embedder, Embedding};
use crate::error::Result;
use log::{debug, info};
use std::cmp::Ordering;

/// A question and its embedding, alive for one retrieval
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub embedding: Embedding,
}

/// Retrieved chunks, most similar first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Keep hits scoring at least `threshold`, order them by descending score
    /// (insertion order on ties) and keep the first `top_k`
    pub fn from_candidates(mut candidates: Vec<ScoredChunk>, top_k: usize, threshold: f32) -> Self {
        candidates.retain(|hit| hit.score >= threshold);
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.sequence.cmp(&b.sequence))
        });
        candidates.truncate(top_k);
        RetrievalResult { hits: candidates }
    }
}

/// Finds the chunks most similar to a question
pub struct Retriever<'a> {
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    top_k: usize,
    threshold: f32,
}

impl<'a> Retriever<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        top_k: usize,
        threshold: f32,
    ) -> Self {
        Retriever {
            embedder,
            index,
            top_k,
            threshold,
        }
    }

    pub fn from_settings(
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        settings: &Settings,
    ) -> Self {
        Self::new(embedder, index, settings.top_k, settings.similarity_threshold)
    }

    /// Embed the question and fetch matching chunks.
    ///
    /// An index with nothing above the threshold yields an empty result.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult> {
        let query = Query {
            text: question.to_string(),
            embedding: self.embedder.embed(question).await?,
        };

        let candidates = self.index.query(&query.embedding, self.top_k).await?;
        let candidate_count = candidates.len();
        let result = RetrievalResult::from_candidates(candidates, self.top_k, self.threshold);

        debug!(
            "Top scores for '{}': {:?}",
            query.text,
            result.hits.iter().map(|h| h.score).collect::<Vec<f32>>()
        );
        info!(
            "Retrieved {} of {} candidates above threshold {}",
            result.len(),
            candidate_count,
            self.threshold
        );
        Ok(result)
    }
}
