//! Generative judgment client
//!
//! [`ChatModel`] is the transport seam; [`HttpChatClient`] speaks the
//! OpenAI-compatible chat completions contract. [`JudgmentClient`] sends a
//! composed prompt and validates the response before anyone reads it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{RagError, Result};
use crate::config::ChatConfig;

/// Shortest acceptable response content, in characters
pub const MIN_CONTENT_CHARS: usize = 10;
/// Longest acceptable response content, in characters
pub const MAX_CONTENT_CHARS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub total_tokens: u32,
}

/// Transport for chat completions
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Client for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct HttpChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpChatClient {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagError::Config(format!("failed to build chat client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for HttpChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RagError::Judgment(format!("chat request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Judgment(format!("chat endpoint returned {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| RagError::Judgment(format!("invalid chat response: {}", e)))
    }
}

/// A validated model answer
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub content: String,
    pub model: String,
    pub total_tokens: u32,
    pub response_id: String,
}

/// Sends prompts and validates what comes back
///
/// Nothing is retried here; recovery is the caller's decision.
pub struct JudgmentClient {
    model: Arc<dyn ChatModel>,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
}

impl JudgmentClient {
    pub fn new(model: Arc<dyn ChatModel>, config: &ChatConfig) -> Self {
        Self {
            model,
            model_name: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub async fn judge(&self, messages: Vec<ChatMessage>) -> Result<Judgment> {
        let request = ChatRequest {
            model: self.model_name.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response = self.model.complete(&request).await?;
        let judgment = validate_response(response)?;
        debug!(
            model = %judgment.model,
            total_tokens = judgment.total_tokens,
            content_chars = judgment.content.chars().count(),
            "Judgment received"
        );
        Ok(judgment)
    }
}

/// Reject empty, undersized, oversized, unmetered or anonymous responses
pub fn validate_response(response: ChatResponse) -> Result<Judgment> {
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| RagError::ResponseValidation("response has no choices".to_string()))?;

    let chars = content.trim().chars().count();
    if chars == 0 {
        return Err(RagError::ResponseValidation("response content is empty".to_string()));
    }
    if chars < MIN_CONTENT_CHARS {
        return Err(RagError::ResponseValidation(format!(
            "response content too short: {} chars",
            chars
        )));
    }
    if chars > MAX_CONTENT_CHARS {
        return Err(RagError::ResponseValidation(format!(
            "response content too long: {} chars",
            chars
        )));
    }

    let total_tokens = response.usage.map_or(0, |u| u.total_tokens);
    if total_tokens == 0 {
        return Err(RagError::ResponseValidation("response reports zero token usage".to_string()));
    }
    if response.model.trim().is_empty() {
        return Err(RagError::ResponseValidation("response is missing the model".to_string()));
    }

    Ok(Judgment {
        content,
        model: response.model,
        total_tokens,
        response_id: response.id,
    })
}
