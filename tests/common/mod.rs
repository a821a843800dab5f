#![allow(dead_code)]

use async_trait::async_trait;
use docqa::answer::{ChatModel, CompletionRequest};
use docqa::config::Settings;
use docqa::database::LocalIndex;
use docqa::embeddings::{Embedder, Embedding};
use docqa::rag::RagEngine;
use docqa::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const DIMENSIONS: usize = 64;

/// Bag-of-words embedder: each lowercase word bumps one hashed dimension
pub struct HashEmbedder;

fn bucket(word: &str) -> usize {
    // FNV-1a
    let hash = word.bytes().fold(0xcbf29ce484222325u64, |h, b| {
        (h ^ b as u64).wrapping_mul(0x100000001b3)
    });
    (hash % DIMENSIONS as u64) as usize
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut values = vec![0.0f32; DIMENSIONS];
                for word in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    values[bucket(&word.to_lowercase())] += 1.0;
                }
                Embedding::new(values)
            })
            .collect())
    }
}

/// Chat model that counts its calls and cites the first context chunk
#[derive(Clone, Default)]
pub struct CountingChat {
    pub calls: Arc<AtomicUsize>,
}

impl CountingChat {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for CountingChat {
    async fn complete(&self, _request: &CompletionRequest<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("According to the documents [1].".to_string())
    }
}

pub fn settings(overrides: &[(&str, &str)]) -> Settings {
    let mut env: HashMap<String, String> = HashMap::new();
    env.insert("OPENAI_API_KEY".into(), "sk-test".into());
    env.insert("CHUNK_SIZE".into(), "200".into());
    env.insert("CHUNK_OVERLAP".into(), "40".into());
    env.insert("SIMILARITY_THRESHOLD".into(), "0.6".into());
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }
    Settings::from_lookup(|key| env.get(key).cloned()).unwrap()
}

pub fn engine(chat: CountingChat) -> RagEngine {
    RagEngine::new(
        settings(&[]),
        Arc::new(HashEmbedder),
        Arc::new(chat),
        Box::new(LocalIndex::in_memory()),
    )
    .unwrap()
}

pub fn write(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}
