//! Embedder collaborator: turns normalised text into a fixed-dimension
//! vector for the vector index leg of recall (spec §4.5, §4.6, §4.9 Embed).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::db::schema::DEFAULT_VECTOR_DIM;
use crate::error::CollaboratorError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
    fn dimensions(&self) -> usize;
}

/// No embedder configured: the vector leg of recall is always skipped and
/// embed jobs fail fast instead of leasing forever.
pub struct NullEmbedder;

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Err(CollaboratorError::NotConfigured)
    }

    fn dimensions(&self) -> usize {
        DEFAULT_VECTOR_DIM
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>, dimensions: usize) -> Self {
        let mut builder = Client::builder().timeout(Duration::from_secs(10));
        if let Some(key) = api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
            builder = builder.default_headers(headers);
        }
        let client = builder.build().expect("embedder HTTP client config is valid");
        Self { client, base_url: base_url.into(), model: model.into(), dimensions }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&EmbedRequest { model: &self.model, input: text })
            .send()
            .await
            .map_err(|e| CollaboratorError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| CollaboratorError::Request(e.to_string()))?
            .json::<EmbedResponse>()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CollaboratorError::InvalidResponse("empty embedding response".into()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
