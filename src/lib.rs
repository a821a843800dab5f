pub mod answer;
pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod openai;
pub mod rag;
pub mod retrieval;
pub mod session;

pub use error::{RagError, Result};
