use crate::document::DocumentFormat;
use crate::error::{RagError, Result};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_COLLECTION: &str = "pdf_documents";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Credentials and endpoint for the OpenAI-compatible API
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Configuration for Qdrant
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

/// Which vector index backs the application
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// JSON snapshot on local disk
    Local { path: PathBuf },
    Qdrant(QdrantConfig),
}

/// Application settings, loaded once at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub default_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub max_file_size_mb: u64,
    pub supported_formats: Vec<DocumentFormat>,
    /// Number of previous turns included in the answer prompt
    pub history_turns: usize,
    pub embedding_batch_size: usize,
    pub request_timeout: Duration,
    pub openai: OpenAiConfig,
    pub backend: BackendConfig,
}

impl Settings {
    /// Create settings from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create settings from an arbitrary key lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("OPENAI_API_KEY").ok_or(RagError::MissingCredential("OPENAI_API_KEY"))?;

        let supported_formats = match get("SUPPORTED_FORMATS") {
            Some(list) => parse_formats(&list)?,
            None => vec![DocumentFormat::Pdf, DocumentFormat::Docx, DocumentFormat::Txt],
        };

        let backend_kind = get("VECTOR_BACKEND").map(|v| v.to_lowercase());
        let backend = match backend_kind.as_deref() {
            None | Some("local") => BackendConfig::Local {
                path: PathBuf::from(get("INDEX_PATH").unwrap_or_else(|| "./docqa_index.json".into())),
            },
            Some("qdrant") => BackendConfig::Qdrant(QdrantConfig {
                url: get("QDRANT_URL").ok_or_else(|| {
                    RagError::InvalidConfiguration(
                        "QDRANT_URL is required when VECTOR_BACKEND=qdrant".to_string(),
                    )
                })?,
                api_key: get("QDRANT_API_KEY"),
                collection: get("COLLECTION_NAME").unwrap_or_else(|| DEFAULT_COLLECTION.into()),
            }),
            Some(other) => {
                return invalid(format!(
                    "VECTOR_BACKEND must be 'local' or 'qdrant', got '{}'",
                    other
                ))
            }
        };

        let settings = Settings {
            chunk_size: parse_or(&get, "CHUNK_SIZE", 1000)?,
            chunk_overlap: parse_or(&get, "CHUNK_OVERLAP", 200)?,
            default_model: get("DEFAULT_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".into()),
            embedding_model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-ada-002".into()),
            temperature: parse_or(&get, "TEMPERATURE", 0.7)?,
            max_tokens: parse_or(&get, "MAX_TOKENS", 1000)?,
            top_k: parse_or(&get, "TOP_K_RESULTS", 5)?,
            similarity_threshold: parse_or(&get, "SIMILARITY_THRESHOLD", 0.7)?,
            max_file_size_mb: parse_or(&get, "MAX_FILE_SIZE_MB", 50)?,
            supported_formats,
            history_turns: parse_or(&get, "HISTORY_TURNS", 5)?,
            embedding_batch_size: parse_or(&get, "EMBEDDING_BATCH_SIZE", 100)?,
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 60)?),
            openai: OpenAiConfig {
                api_key,
                base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.into()),
            },
            backend,
        };

        settings.validate()?;
        debug!("Loaded settings: {:?}", settings);
        Ok(settings)
    }

    /// Check that the values are consistent with each other
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return invalid("CHUNK_SIZE must be greater than zero");
        }
        if self.chunk_overlap >= self.chunk_size {
            return invalid(format!(
                "CHUNK_OVERLAP ({}) must be less than CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.top_k == 0 {
            return invalid("TOP_K_RESULTS must be greater than zero");
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return invalid(format!(
                "SIMILARITY_THRESHOLD ({}) must lie in [-1, 1]",
                self.similarity_threshold
            ));
        }
        if self.supported_formats.is_empty() {
            return invalid("SUPPORTED_FORMATS must name at least one format");
        }
        if self.embedding_batch_size == 0 {
            return invalid("EMBEDDING_BATCH_SIZE must be greater than zero");
        }
        if self.request_timeout.is_zero() {
            return invalid("REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }

    /// Upload limit in bytes
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(RagError::InvalidConfiguration(message.into()))
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            RagError::InvalidConfiguration(format!("{} has invalid value '{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}

/// Parse a comma separated extension list such as `.pdf,.docx,txt`
fn parse_formats(list: &str) -> Result<Vec<DocumentFormat>> {
    let mut formats = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let format = DocumentFormat::from_extension(item).ok_or_else(|| {
            RagError::InvalidConfiguration(format!("SUPPORTED_FORMATS names unknown format '{}'", item))
        })?;
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    Ok(formats)
}
