//! Text-to-vector providers.
//!
//! The provider is the boundary to the embedding service. It receives one
//! batch at a time; batching, pacing and cancellation live in `Embedder`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;

/// Errors returned by a single provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API key not set: environment variable {0} is empty")]
    MissingApiKey(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("model error: {0}")]
    Model(String),
}

/// Something that turns a batch of strings into one vector per string, in order.
pub trait EmbeddingProvider: Send + Sync {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Provider kind, e.g. "openai"
    fn kind(&self) -> &str;

    /// Model identifier, fixed per deployment
    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiProvider {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_base: &str,
        api_key: String,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", api_base.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
        })
    }

    /// Build from config, reading the key from the configured environment variable.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey(config.api_key_env.clone()));
        }

        Self::new(
            &config.api_base,
            api_key,
            &config.model,
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

impl EmbeddingProvider for OpenAiProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let parsed: EmbeddingResponse = resp.json()?;
        order_response(parsed.data, texts.len())
    }

    fn kind(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Put response vectors back into input order and check every input got one.
fn order_response(
    mut data: Vec<EmbeddingData>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if data.len() != expected {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }

    data.sort_by_key(|d| d.index);
    if data.iter().enumerate().any(|(pos, d)| pos != d.index) {
        return Err(ProviderError::InvalidResponse(
            "embedding indexes are not a permutation of the input".to_string(),
        ));
    }

    Ok(data.into_iter().map(|d| d.embedding).collect())
}
