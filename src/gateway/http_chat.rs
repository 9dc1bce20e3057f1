//! Adapter for OpenAI-compatible chat-completion endpoints behind a hosted
//! inference router.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{CallError, ErrorContext};
use super::types::*;
use super::{read_capped_body, CompletionProvider};

// =============================================================================
// HTTP CHAT ADAPTER
// =============================================================================

pub const DEFAULT_CHAT_BASE_URL: &str = "https://router.huggingface.co/v1";

/// Default per-call wall-clock bound.
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(90);

/// Maximum allowed input characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

const PROVIDER: &str = "http_chat";

/// Chat-completion adapter: one POST per call, status-classified failures.
#[derive(Debug, Clone)]
pub struct HttpChatAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatAdapter {
    /// Create from API key against the default router.
    pub fn new(api_key: impl Into<String>) -> Result<Self, CallError> {
        Self::with_config(api_key, DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_TIMEOUT)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CallError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| CallError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| CallError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

/// Pull `error` / `error.message` / `error.code` out of an error body. Routers
/// are inconsistent: some send `{"error": "text"}`, others an object.
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None);
    };
    let error = &value["error"];
    if let Some(text) = error.as_str() {
        return (Some(text.to_string()), None);
    }
    let message = error["message"].as_str().map(str::to_string);
    let code = match &error["code"] {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    (message, code)
}

// =============================================================================
// COMPLETION PROVIDER IMPL
// =============================================================================

#[async_trait]
impl CompletionProvider for HttpChatAdapter {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, CallError> {
        let total_chars = req.prompt.len();
        if total_chars > MAX_INPUT_CHARS {
            return Err(CallError::provider(
                PROVIDER,
                format!("Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"),
            ));
        }

        let start = Instant::now();
        let messages = req.messages();
        let api_req = ChatApiRequest {
            model: &req.model,
            messages: &messages,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await
            .map_err(|e| CallError::from_transport(PROVIDER, e))?;

        let status = response.status().as_u16();
        let request_id = Self::extract_request_id(response.headers());
        let body = read_capped_body(PROVIDER, response).await?;

        let mut ctx = ErrorContext::new().with_status(status);
        if let Some(id) = &request_id {
            ctx = ctx.with_request_id(id);
        }

        if status != 200 {
            let (message, code) = parse_error_body(&body);
            if let Some(code) = code {
                ctx = ctx.with_code(code);
            }
            let message = message.unwrap_or_else(|| format!("HTTP {status}"));
            return Err(match status {
                429 => CallError::rate_limited(ctx),
                503 => CallError::model_loading(ctx),
                400 => CallError::model_unavailable(message, ctx),
                _ => CallError::provider_with_context(PROVIDER, message, ctx),
            });
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body)
            .map_err(|e| CallError::provider(PROVIDER, format!("Invalid JSON: {e}")))?;

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| CallError::provider(PROVIDER, "No choices in response"))?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| CallError::provider(PROVIDER, "No message content in first choice"))?;

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| {
                (
                    u.prompt_tokens.unwrap_or(0),
                    u.completion_tokens.unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_accepts_string_and_object_shapes() {
        let (message, code) = parse_error_body(r#"{"error": "Model is overloaded"}"#);
        assert_eq!(message.as_deref(), Some("Model is overloaded"));
        assert_eq!(code, None);

        let (message, code) =
            parse_error_body(r#"{"error": {"message": "bad model", "code": 400}}"#);
        assert_eq!(message.as_deref(), Some("bad model"));
        assert_eq!(code.as_deref(), Some("400"));

        assert_eq!(parse_error_body("<html>"), (None, None));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let adapter =
            HttpChatAdapter::with_config("k", "http://localhost:1/v1/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(adapter.chat_url(), "http://localhost:1/v1/chat/completions");
    }
}
