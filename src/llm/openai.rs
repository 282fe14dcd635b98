//! `OpenAI` and `OpenAI`-compatible chat completions provider

use super::types::{LlmRequest, LlmResponse, Role, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Reasoning-family models reject `max_tokens` and want `max_completion_tokens`
fn uses_max_completion_tokens(model: &str) -> bool {
    ["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

/// OpenAI-compatible service implementation
pub struct OpenAIService {
    client: Client,
    api_key: Option<String>,
    model: String,
    url: String,
}

impl OpenAIService {
    /// `api_key` may be absent for self-hosted compatible servers that do
    /// not check authorization.
    pub fn new(
        api_key: Option<String>,
        model: String,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
            url: format!("{base}/chat/completions"),
        })
    }

    fn translate_request(&self, request: &LlmRequest) -> OpenAIRequest {
        let mut messages = Vec::with_capacity(request.turns.len());

        if let Some(system) = request.system_text() {
            messages.push(OpenAIMessage {
                role: "system",
                content: system,
            });
        }

        messages.extend(request.dialogue().into_iter().map(|turn| OpenAIMessage {
            role: match turn.role {
                Role::Assistant => "assistant",
                Role::User | Role::System => "user",
            },
            content: turn.text,
        }));

        let (max_tokens, max_completion_tokens) = if uses_max_completion_tokens(&self.model) {
            (None, Some(request.params.max_tokens))
        } else {
            (Some(request.params.max_tokens), None)
        };

        OpenAIRequest {
            model: self.model.clone(),
            messages,
            max_tokens,
            max_completion_tokens,
            stream: false,
        }
    }
}

pub(super) fn normalize_response(resp: OpenAIResponse) -> Result<LlmResponse, LlmError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::empty("No choices in response"))?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(LlmError::blocked("Completion blocked by content filter"));
    }
    if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
        return Err(LlmError::blocked(format!("Model refused: {refusal}")));
    }

    let text = choice.message.content.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(LlmError::empty(format!(
            "Empty completion (finish_reason={})",
            choice.finish_reason.as_deref().unwrap_or("none")
        )));
    }

    let usage = resp.usage.unwrap_or_default();
    Ok(LlmResponse {
        text,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    })
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<OpenAIErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message)
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let openai_request = self.translate_request(request);

        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(LlmError::from_status(status, &error_detail(&body)));
        }

        let openai_response: OpenAIResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::malformed(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        normalize_response(openai_response)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAIResponse {
    pub choices: Vec<OpenAIChoice>,
    pub usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAIChoice {
    pub message: OpenAIResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAIResponseMessage {
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct OpenAIUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    message: String,
}
