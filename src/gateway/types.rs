//! Core types for the provider gateway.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// PROVIDER KIND
// =============================================================================

/// Wire shape of an inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Managed generate-content API (single call, structured candidates payload).
    DirectSdk,
    /// OpenAI-compatible chat-completion endpoint behind a hosted router.
    HttpChat,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::DirectSdk => "direct-sdk",
            ProviderKind::HttpChat => "http-chat",
        }
    }
}

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role. Classification prompts are single user turns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One canonical single-shot request: a prompt for a model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Backend-specific model identifier, e.g. "Qwen/Qwen2.5-Coder-7B-Instruct".
    pub model: String,
    /// The full classification prompt.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: None,
            temperature: 0.1,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn messages(&self) -> Vec<Message> {
        vec![Message::user(&self.prompt)]
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("content_filter") | Some("safety") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Plain-text response of a successful call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content.
    pub content: String,
    /// Input tokens consumed, when reported.
    pub input_tokens: u32,
    /// Output tokens generated, when reported.
    pub output_tokens: u32,
    /// Time taken for the request.
    pub latency: Duration,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}

impl CompletionResponse {
    /// Text-only response, for providers and tests that report nothing else.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            input_tokens: 0,
            output_tokens: 0,
            latency: Duration::ZERO,
            finish_reason: FinishReason::Stop,
        }
    }
}
