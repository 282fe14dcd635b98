//! Google Gemini provider implementation

use super::types::{LlmRequest, LlmResponse, Role, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that mean the candidate was withheld
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Gemini service implementation
pub struct GeminiService {
    client: Client,
    api_key: String,
    model: String,
    url: String,
}

impl GeminiService {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::network(format!("Failed to create HTTP client: {e}")))?;

        let url = format!("{base}/models/{model}:generateContent");
        Ok(Self {
            client,
            api_key,
            model,
            url,
        })
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let system_instruction = request.system_text().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text }],
        });

        let contents = request
            .dialogue()
            .into_iter()
            .map(|turn| GeminiContent {
                role: Some(match turn.role {
                    Role::Assistant => "model",
                    Role::User | Role::System => "user",
                }),
                parts: vec![GeminiPart { text: turn.text }],
            })
            .collect();

        GeminiRequest {
            system_instruction,
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: request.params.max_tokens,
            },
        }
    }
}

pub(super) fn normalize_response(resp: GeminiResponse) -> Result<LlmResponse, LlmError> {
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(LlmError::blocked(format!("Prompt blocked: {reason}")));
    }

    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::empty("No candidates in response"))?;

    if let Some(reason) = candidate
        .finish_reason
        .as_deref()
        .filter(|r| BLOCKING_FINISH_REASONS.contains(r))
    {
        return Err(LlmError::blocked(format!("Candidate blocked: {reason}")));
    }

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(LlmError::empty(format!(
            "Empty candidate (finishReason={})",
            candidate.finish_reason.as_deref().unwrap_or("none")
        )));
    }

    let usage = resp.usage_metadata.unwrap_or_default();
    Ok(LlmResponse {
        text,
        usage: Usage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
        },
    })
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<GeminiErrorResponse>(body)
        .map_or_else(|_| body.to_string(), |e| e.error.message)
}

#[async_trait]
impl LlmService for GeminiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let gemini_request = Self::translate_request(request);

        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&gemini_request)
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

        let gemini_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::malformed(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        normalize_response(gemini_response)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    pub prompt_feedback: Option<GeminiPromptFeedback>,
    pub usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiCandidate {
    pub content: Option<GeminiResponseContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GeminiResponseContent {
    #[serde(default)]
    pub parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GeminiResponsePart {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiPromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiUsage {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}
