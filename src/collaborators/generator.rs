//! Generator collaborator: the LLM used to extract structured facts and
//! entity mentions from a memory's content (spec §4.9 Extract, Decide).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// One fact pulled out of a memory's content, plus the entities it mentions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractedFact {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f64,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default = "default_mention_confidence")]
    pub confidence: f64,
}

fn default_mention_confidence() -> f64 {
    1.0
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Extract structured facts and entity mentions from `content`.
    async fn extract(&self, content: &str) -> Result<Vec<ExtractedFact>, CollaboratorError>;

    /// Free-form completion, used by the Decide worker's contradiction pass
    /// and the Summary worker.
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// No generator configured: extraction and decision passes are skipped.
pub struct NullGenerator;

#[async_trait]
impl Generator for NullGenerator {
    async fn extract(&self, _content: &str) -> Result<Vec<ExtractedFact>, CollaboratorError> {
        Err(CollaboratorError::NotConfigured)
    }

    async fn complete(&self, _prompt: &str) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::NotConfigured)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

const EXTRACT_SYSTEM_PROMPT: &str = "Extract discrete facts and named entities from the user's text. \
Respond with a JSON array of objects: {\"content\", \"type\", \"confidence\", \"entities\": [{\"name\", \"type\", \"confidence\"}]}.";

/// OpenAI-compatible chat-completions endpoint.
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));
        if let Some(key) = api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
            builder = builder.default_headers(headers);
        }
        let client = builder.build().expect("generator HTTP client config is valid");
        Self { client, base_url: base_url.into(), model: model.into() }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&ChatRequest {
                model: &self.model,
                messages: vec![
                    ChatMessage { role: "system", content: system },
                    ChatMessage { role: "user", content: user },
                ],
                response_format: None,
            })
            .send()
            .await
            .map_err(|e| CollaboratorError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| CollaboratorError::Request(e.to_string()))?
            .json::<ChatResponse>()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::InvalidResponse("empty completion response".into()))
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn extract(&self, content: &str) -> Result<Vec<ExtractedFact>, CollaboratorError> {
        let raw = self.chat(EXTRACT_SYSTEM_PROMPT, content).await?;
        serde_json::from_str(&raw).map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))
    }

    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        self.chat("You are a careful, concise assistant.", prompt).await
    }
}
