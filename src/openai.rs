use crate::answer::{ChatMessage, ChatModel, CompletionRequest};
use crate::config::{OpenAiConfig, Settings};
use crate::embeddings::{Embedder, Embedding};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for an OpenAI-compatible API, used for both embeddings and chat
#[derive(Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    embedding_model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new client whose requests give up after `timeout`
    pub fn new(config: OpenAiConfig, embedding_model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                RagError::InvalidConfiguration(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(OpenAiClient {
            config,
            embedding_model: embedding_model.to_string(),
            client,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.openai.clone(),
            &settings.embedding_model,
            settings.request_timeout,
        )
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    /// POST a JSON body and decode the JSON reply, describing failures as text
    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> std::result::Result<R, String>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .post(self.url(endpoint))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("request to {} timed out", endpoint)
                } else {
                    format!("request to {} failed: {}", endpoint, e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(format!("API request failed: {} {}", status, detail));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| format!("failed to parse response: {}", e))
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Requesting {} embeddings from {}",
            texts.len(),
            self.embedding_model
        );
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };

        let mut response: EmbeddingResponse = self
            .post_json("embeddings", &request)
            .await
            .map_err(|message| {
                error!("Embedding request failed: {}", message);
                RagError::EmbeddingService(message)
            })?;

        if response.data.len() != texts.len() {
            return Err(RagError::EmbeddingService(format!(
                "sent {} inputs, received {} embeddings",
                texts.len(),
                response.data.len()
            )));
        }

        // The API tags each vector with its input position
        response.data.sort_by_key(|d| d.index);
        Ok(response
            .data
            .into_iter()
            .map(|d| Embedding::new(d.embedding))
            .collect())
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        let body = ChatRequest {
            model: request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response: ChatResponse =
            self.post_json("chat/completions", &body)
                .await
                .map_err(|message| {
                    error!("Chat completion failed: {}", message);
                    RagError::GenerationService(message)
                })?;

        // Extract the generated text from the response
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::GenerationService("No response generated".to_string()))
    }
}

// Request/response structures for the OpenAI API

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ErrorDetail {
    message: String,
}
