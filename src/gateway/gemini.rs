//! Adapter for the managed generate-content API.
//!
//! Single call per request. Quota exhaustion is reported either as HTTP 429 or
//! as a `RESOURCE_EXHAUSTED` status in the error payload; both map to
//! [`CallError::QuotaExceeded`]. Every other non-success is a generic provider
//! error, except timeouts and connection failures, which stay transient.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{CallError, ErrorContext};
use super::types::*;
use super::{read_capped_body, CompletionProvider};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1";

pub const DEFAULT_GEMINI_TIMEOUT: Duration = Duration::from_secs(60);

const PROVIDER: &str = "gemini";

const QUOTA_STATUS: &str = "RESOURCE_EXHAUSTED";

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CallError> {
        Self::with_config(api_key, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_TIMEOUT)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CallError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key_value = HeaderValue::from_str(&api_key)
            .map_err(|_| CallError::config("Invalid API key format"))?;
        headers.insert("x-goog-api-key", key_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| CallError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn generate_url(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<PartOut<'a>>,
}

#[derive(Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Deserialize)]
struct PartIn {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    status: Option<String>,
}

// =============================================================================
// COMPLETION PROVIDER IMPL
// =============================================================================

#[async_trait]
impl CompletionProvider for GeminiAdapter {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, CallError> {
        let start = Instant::now();

        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![PartOut { text: &req.prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: req.max_tokens,
                temperature: req.temperature,
            },
        };

        let response = self
            .client
            .post(self.generate_url(&req.model))
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::from_transport(PROVIDER, e))?;

        let status = response.status();
        let raw = read_capped_body(PROVIDER, response).await?;
        let mut ctx = ErrorContext::new().with_status(status.as_u16());

        if !status.is_success() {
            let api_error = serde_json::from_str::<ErrorEnvelope>(&raw).ok().map(|e| e.error);
            let message = api_error
                .as_ref()
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            let api_status = api_error.and_then(|e| e.status);
            if let Some(code) = &api_status {
                ctx = ctx.with_code(code);
            }

            if status.as_u16() == 429 || api_status.as_deref() == Some(QUOTA_STATUS) {
                return Err(CallError::quota_exceeded(message, ctx));
            }
            return Err(CallError::provider_with_context(PROVIDER, message, ctx));
        }

        let parsed: GenerateResponse = serde_json::from_str(&raw)
            .map_err(|e| CallError::provider(PROVIDER, format!("Invalid JSON: {e}")))?;

        let candidate = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| CallError::provider(PROVIDER, "No candidates in response"))?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let (input_tokens, output_tokens) = parsed
            .usage_metadata
            .map(|u| {
                (
                    u.prompt_token_count.unwrap_or(0),
                    u.candidates_token_count.unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(candidate.finish_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_url_accepts_prefixed_model_names() {
        let adapter =
            GeminiAdapter::with_config("k", "http://localhost:1/v1", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            adapter.generate_url("gemini-2.0-flash"),
            "http://localhost:1/v1/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(
            adapter.generate_url("models/gemini-2.0-flash"),
            "http://localhost:1/v1/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn request_body_uses_camel_case() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![PartOut { text: "hi" }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: Some(50),
                temperature: 0.1,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 50);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }
}
