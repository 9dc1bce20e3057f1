//! Usage tracking via the UsageSink trait.
//!
//! The gateway reports every attempt (not just every invocation) through a
//! UsageSink, so retries are visible:
//! - the CLI uses TracingUsageSink (debug-level events)
//! - tests use NoopUsageSink or their own collecting sink

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Status of a provider call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of one provider call attempt.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Configured provider name, e.g. "qwen".
    pub provider: String,
    /// Model used.
    pub model: String,
    /// 1-based attempt number within one invocation.
    pub attempt: u32,
    /// Input tokens consumed.
    pub input_tokens: u32,
    /// Output tokens generated.
    pub output_tokens: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Call status.
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<&'static str>,
    /// Provider request ID (for debugging).
    pub request_id: Option<String>,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
}

impl CallRecord {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, attempt: u32) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            attempt,
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: &'static str) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code);
        self
    }

    pub fn request_id(mut self, id: Option<&str>) -> Self {
        self.request_id = id.map(str::to_string);
        self
    }
}

/// Trait for recording provider call attempts.
///
/// Implementations must be fire-and-forget: failures are logged, never
/// propagated into the run.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: CallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: CallRecord) {}
}

/// Usage sink that emits each attempt as a `tracing` debug event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: CallRecord) {
        tracing::debug!(
            provider = %record.provider,
            model = %record.model,
            attempt = record.attempt,
            status = record.status.as_str(),
            error_code = record.error_code.unwrap_or(""),
            request_id = record.request_id.as_deref().unwrap_or(""),
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            latency_ms = record.latency_ms,
            "provider call"
        );
    }
}
