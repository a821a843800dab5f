use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the document QA pipeline
#[derive(Debug, Error)]
pub enum RagError {
    /// File extension is not in the configured supported-format set
    #[error("Unsupported document format '{extension}' for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// The parser could not read the file
    #[error("Failed to extract text from {}: {message}", path.display())]
    Extraction { path: PathBuf, message: String },

    /// File exceeds the configured upload limit
    #[error("{} is {size_mb:.1} MB, larger than the {limit_mb} MB limit", path.display())]
    FileTooLarge {
        path: PathBuf,
        size_mb: f64,
        limit_mb: u64,
    },

    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Generation service error: {0}")]
    GenerationService(String),

    #[error("Vector index error ({backend}): {message}")]
    VectorIndex {
        backend: &'static str,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Errors scoped to a single input file.
    ///
    /// Batch ingestion records these and moves on to the next file; any other
    /// error aborts the whole operation.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            RagError::UnsupportedFormat { .. }
                | RagError::Extraction { .. }
                | RagError::FileTooLarge { .. }
        )
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        RagError::Extraction {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn index(backend: &'static str, message: impl ToString) -> Self {
        RagError::VectorIndex {
            backend,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
