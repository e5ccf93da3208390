//! Model provider adapter.
//!
//! The coordinator treats the model as an opaque text-completion oracle behind
//! [`ModelProvider`]. [`ChatCompletionsProvider`] speaks the OpenAI-style
//! chat-completions protocol over a blocking HTTP client with a hard timeout.

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ModelConfig;

/// One request to the model: system instructions plus user context.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Synchronous text-completion oracle.
pub trait ModelProvider {
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// HTTP adapter for `{base_url}/v1/chat/completions`.
#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_response_bytes: usize,
}

impl ChatCompletionsProvider {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(anyhow!("model API key must not be empty"));
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint_url(&config.base_url),
            api_key,
            model: config.name.clone(),
            max_response_bytes: config.max_response_bytes,
        })
    }
}

impl ModelProvider for ChatCompletionsProvider {
    #[instrument(skip_all, fields(model = %self.model))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        info!(
            endpoint = %self.endpoint,
            prompt_bytes = request.system.len() + request.user.len(),
            "sending model request"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let text = response.text().context("read model response body")?;
        let content = parse_completion(status, &text)?;
        Ok(truncate_to_bytes(content, self.max_response_bytes))
    }
}

fn endpoint_url(base_url: &str) -> String {
    format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
}

/// Map a raw HTTP response to the first choice's text.
fn parse_completion(status: StatusCode, body: &str) -> Result<String> {
    if !status.is_success() {
        if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
            let msg = err
                .msg
                .or_else(|| err.error.and_then(|e| e.message))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(anyhow!("model API error {status}: {msg}"));
        }
        return Err(anyhow!("model API error {status}: {}", body.trim()));
    }

    let parsed: ChatResponse = serde_json::from_str(body).context("parse model response")?;
    if let Some(usage) = &parsed.usage {
        debug!(
            model = parsed.model.as_deref().unwrap_or("?"),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "model usage"
        );
    }
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| anyhow!("model response has no choices"))?;
    Ok(content)
}

/// Cut `text` to at most `limit` bytes on a char boundary.
fn truncate_to_bytes(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    warn!(bytes = text.len(), limit, "model response truncated");
    text.truncate(cut);
    text
}
