use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to the model API failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("model API returned no choices")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A chat-completion model. `stop` sequences end generation early.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], stop: &[&str]) -> Result<String, LlmError>;
}

/// Builds a model client for the API key typed into the form.
pub trait ModelProvider: Send + Sync {
    fn build(&self, api_key: &str) -> Arc<dyn ChatModel>;
}

// Request/response shapes of the OpenAI-compatible /chat/completions endpoint
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop: &'a [&'a str],
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize, Debug)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize, Debug)]
struct CompletionMessage {
    content: Option<String>,
}

/// Groq chat-completions client.
#[derive(Clone)]
pub struct GroqClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GroqClient {
    pub fn new(http: Client, base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl fmt::Debug for GroqClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroqClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    #[instrument(skip_all, fields(model = %self.model, messages = messages.len()))]
    async fn complete(&self, messages: &[ChatMessage], stop: &[&str]) -> Result<String, LlmError> {
        let payload = CompletionRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
            stop,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Groq API request failed");
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion = response.json::<CompletionResponse>().await?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?
            .message
            .content
            .unwrap_or_default();

        debug!(chars = text.len(), "Received completion");
        Ok(text)
    }
}

/// Hands out [`GroqClient`]s sharing one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct GroqProvider {
    http: Client,
    base_url: String,
    model: String,
}

impl GroqProvider {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            model: model.to_string(),
        })
    }
}

impl ModelProvider for GroqProvider {
    fn build(&self, api_key: &str) -> Arc<dyn ChatModel> {
        Arc::new(GroqClient::new(
            self.http.clone(),
            &self.base_url,
            &self.model,
            api_key,
        ))
    }
}
