//! Provider gateway: classification calls with per-provider retry policies.
//!
//! [`ClassifierGateway::invoke`] never fails. Every failure mode ends in a
//! sentinel [`Outcome`], so the orchestrator can record it and move on.

pub mod error;
pub mod gemini;
pub mod http_chat;
pub mod retry;
pub mod types;
pub mod usage;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::sleep;

use crate::normalize::Normalizer;
use crate::taxonomy::{Outcome, Sentinel};

pub use error::{CallError, CallErrorKind, ErrorContext};
pub use gemini::GeminiAdapter;
pub use http_chat::HttpChatAdapter;
pub use retry::{Backoff, RetryDecision, RetryOverrides, RetryPolicy};
pub use types::*;
pub use usage::{CallRecord, CallStatus, NoopUsageSink, TracingUsageSink, UsageSink};

/// Largest response body read from a provider.
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Generation cap for chat providers; a bare code needs far fewer tokens.
pub const DEFAULT_CHAT_MAX_TOKENS: u32 = 150;

const PROBE_MAX_TOKENS: u32 = 20;

/// One single-shot call against one backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, CallError>;
}

/// Read a response body, refusing anything larger than 1 MiB.
pub(crate) async fn read_capped_body(
    provider: &'static str,
    mut response: reqwest::Response,
) -> Result<String, CallError> {
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| CallError::from_transport(provider, e))?
    {
        if buf.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(CallError::provider(
                provider,
                format!("Response body exceeds {MAX_RESPONSE_BYTES} bytes"),
            ));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// =============================================================================
// PROVIDER SLOT
// =============================================================================

/// A configured provider: adapter plus everything needed to call it.
pub struct ProviderSlot {
    name: String,
    kind: ProviderKind,
    model: String,
    max_tokens: Option<u32>,
    temperature: f32,
    pacing: Duration,
    retry: RetryPolicy,
    normalizer: Normalizer,
    adapter: Arc<dyn CompletionProvider>,
}

impl ProviderSlot {
    pub fn new(
        name: impl Into<String>,
        kind: ProviderKind,
        model: impl Into<String>,
        adapter: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            model: model.into(),
            max_tokens: match kind {
                ProviderKind::HttpChat => Some(DEFAULT_CHAT_MAX_TOKENS),
                ProviderKind::DirectSdk => None,
            },
            temperature: 0.1,
            pacing: Duration::ZERO,
            retry: RetryPolicy::for_kind(kind),
            normalizer: Normalizer::standard(),
            adapter,
        }
    }

    pub fn max_tokens(mut self, max: Option<u32>) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    /// Wait after each call to this provider (skipped after the last
    /// provider of a sample).
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn pacing_delay(&self) -> Duration {
        self.pacing
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn request(&self, prompt: &str) -> CompletionRequest {
        let req = CompletionRequest::new(&self.model, prompt).temperature(self.temperature);
        match self.max_tokens {
            Some(max) => req.max_tokens(max),
            None => req,
        }
    }
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("pacing", &self.pacing)
            .field("retry", &self.retry)
            .field("normalizer", &self.normalizer)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

/// Result of one classification invocation against one provider.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Canonical code, `PARSE_ERROR`, or the failure sentinel.
    pub outcome: Outcome,
    /// Provider calls made, retries included.
    pub attempts: u32,
    /// Error code of the final failed attempt, if the invocation failed.
    pub last_error: Option<&'static str>,
    /// Raw model text of the successful attempt.
    pub response: Option<String>,
    /// Wall-clock time across all attempts and waits.
    pub elapsed: Duration,
}

impl Invocation {
    fn failed(sentinel: Sentinel, attempts: u32, code: &'static str, start: Instant) -> Self {
        Self {
            outcome: sentinel.into(),
            attempts,
            last_error: Some(code),
            response: None,
            elapsed: start.elapsed(),
        }
    }

    /// Retries beyond the first call.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Ordered set of providers sharing one usage sink.
pub struct ClassifierGateway {
    providers: Vec<ProviderSlot>,
    usage_sink: Arc<dyn UsageSink>,
}

impl std::fmt::Debug for ClassifierGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierGateway")
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

impl ClassifierGateway {
    pub fn new(usage_sink: Arc<dyn UsageSink>) -> Self {
        Self {
            providers: Vec::new(),
            usage_sink,
        }
    }

    /// Append a provider. Call order follows insertion order.
    pub fn add_provider(&mut self, slot: ProviderSlot) -> Result<(), CallError> {
        if self.providers.iter().any(|p| p.name == slot.name) {
            return Err(CallError::config(format!(
                "duplicate provider name: {}",
                slot.name
            )));
        }
        self.providers.push(slot);
        Ok(())
    }

    pub fn with_provider(mut self, slot: ProviderSlot) -> Result<Self, CallError> {
        self.add_provider(slot)?;
        Ok(self)
    }

    pub fn providers(&self) -> &[ProviderSlot] {
        &self.providers
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSlot> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    /// Keep only the named providers, in their configured order.
    pub fn retain(&mut self, names: &[String]) -> Result<(), CallError> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        for name in &wanted {
            if self.provider(name).is_none() {
                return Err(CallError::config(format!("unknown provider: {name}")));
            }
        }
        self.providers.retain(|p| wanted.contains(p.name.as_str()));
        Ok(())
    }

    /// One raw call with no retry and no normalization, for connectivity
    /// checks.
    pub async fn probe(&self, provider_name: &str, prompt: &str) -> Result<CompletionResponse, CallError> {
        let slot = self
            .provider(provider_name)
            .ok_or_else(|| CallError::config(format!("unknown provider: {provider_name}")))?;
        let req = CompletionRequest::new(&slot.model, prompt)
            .temperature(slot.temperature)
            .max_tokens(PROBE_MAX_TOKENS);
        slot.adapter.complete(&req).await
    }

    /// Classify one prompt with one provider, retrying per its policy.
    pub async fn invoke(&self, provider_name: &str, prompt: &str) -> Invocation {
        let start = Instant::now();
        let Some(slot) = self.provider(provider_name) else {
            tracing::warn!(provider = provider_name, "invoke on unknown provider");
            return Invocation::failed(Sentinel::Error, 0, "config_error", start);
        };

        let req = slot.request(prompt);
        let mut attempt = 0u32;
        let mut loading_retries = 0u32;

        loop {
            attempt += 1;
            let call_start = Instant::now();
            match slot.adapter.complete(&req).await {
                Ok(resp) => {
                    let record = CallRecord::new(&slot.name, &slot.model, attempt)
                        .tokens(resp.input_tokens, resp.output_tokens)
                        .latency(call_start.elapsed().as_millis() as u64);
                    self.usage_sink.record(record).await;

                    let outcome = slot.normalizer.normalize(&resp.content);
                    if !outcome.is_category() {
                        tracing::warn!(
                            provider = %slot.name,
                            response = %truncate_for_log(&resp.content),
                            "no category code in response"
                        );
                    }
                    return Invocation {
                        outcome,
                        attempts: attempt,
                        last_error: None,
                        response: Some(resp.content),
                        elapsed: start.elapsed(),
                    };
                }
                Err(err) => {
                    let record = CallRecord::new(&slot.name, &slot.model, attempt)
                        .latency(call_start.elapsed().as_millis() as u64)
                        .error(err.code())
                        .request_id(err.request_id());
                    self.usage_sink.record(record).await;

                    match slot.retry.decide(err.kind(), attempt, loading_retries) {
                        RetryDecision::Retry(delay) => {
                            if err.kind() == CallErrorKind::ModelLoading {
                                loading_retries += 1;
                            }
                            tracing::debug!(
                                provider = %slot.name,
                                attempt,
                                error = %err,
                                delay_ms = delay.as_millis() as u64,
                                "retrying provider call"
                            );
                            sleep(delay).await;
                        }
                        RetryDecision::GiveUp(sentinel) => {
                            tracing::warn!(
                                provider = %slot.name,
                                attempts = attempt,
                                error = %err,
                                outcome = sentinel.as_str(),
                                "provider call failed"
                            );
                            return Invocation::failed(sentinel, attempt, err.code(), start);
                        }
                    }
                }
            }
        }
    }
}

fn truncate_for_log(text: &str) -> String {
    const MAX: usize = 120;
    let trimmed = text.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::CategoryCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script of results, repeating the last one.
    struct Scripted {
        script: Mutex<Vec<Result<String, CallErrorKind>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(script: Vec<Result<&str, CallErrorKind>>) -> Arc<Self> {
            let mut script: Vec<_> = script
                .into_iter()
                .map(|r| r.map(str::to_string))
                .collect();
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        async fn complete(&self, _req: &CompletionRequest) -> Result<CompletionResponse, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop().unwrap()
                } else {
                    script.last().cloned().unwrap()
                }
            };
            match next {
                Ok(text) => Ok(CompletionResponse::text(text)),
                Err(CallErrorKind::Transient) => Err(CallError::transient("boom")),
                Err(CallErrorKind::RateLimited) => {
                    Err(CallError::rate_limited(ErrorContext::new().with_status(429)))
                }
                Err(CallErrorKind::ModelLoading) => {
                    Err(CallError::model_loading(ErrorContext::new().with_status(503)))
                }
                Err(CallErrorKind::ModelUnavailable) => Err(CallError::model_unavailable(
                    "bad model",
                    ErrorContext::new().with_status(400),
                )),
                Err(CallErrorKind::QuotaExceeded) => Err(CallError::quota_exceeded(
                    "quota",
                    ErrorContext::new().with_status(429),
                )),
                Err(_) => Err(CallError::provider("scripted", "nope")),
            }
        }
    }

    fn gateway(adapter: Arc<Scripted>, kind: ProviderKind, attempts: u32) -> ClassifierGateway {
        ClassifierGateway::new(Arc::new(NoopUsageSink))
            .with_provider(
                ProviderSlot::new("p", kind, "m", adapter).retry(RetryPolicy::immediate(attempts)),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn success_is_normalized() {
        let adapter = Scripted::new(vec![Ok("Category: loop_cond")]);
        let gw = gateway(adapter.clone(), ProviderKind::HttpChat, 3);
        let inv = gw.invoke("p", "prompt").await;
        assert_eq!(inv.outcome, Outcome::Category(CategoryCode::LoopCond));
        assert_eq!(inv.attempts, 1);
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn unparseable_response_is_not_retried() {
        let adapter = Scripted::new(vec![Ok("I am not sure.")]);
        let gw = gateway(adapter.clone(), ProviderKind::HttpChat, 3);
        let inv = gw.invoke("p", "prompt").await;
        assert_eq!(inv.outcome, Outcome::Sentinel(Sentinel::ParseError));
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limit_then_success_counts_one_retry() {
        let adapter = Scripted::new(vec![Err(CallErrorKind::RateLimited), Ok("COND_BRANCH")]);
        let gw = gateway(adapter.clone(), ProviderKind::HttpChat, 3);
        let inv = gw.invoke("p", "prompt").await;
        assert_eq!(inv.outcome, Outcome::Category(CategoryCode::CondBranch));
        assert_eq!(inv.retries(), 1);
    }

    #[tokio::test]
    async fn rate_limit_exhaustion() {
        let adapter = Scripted::new(vec![Err(CallErrorKind::RateLimited)]);
        let gw = gateway(adapter.clone(), ProviderKind::HttpChat, 3);
        let inv = gw.invoke("p", "prompt").await;
        assert_eq!(inv.outcome, Outcome::Sentinel(Sentinel::RateLimited));
        assert_eq!(adapter.calls(), 3);
        assert_eq!(inv.last_error, Some("rate_limited"));
    }

    #[tokio::test]
    async fn model_loading_twice_stops_after_two_calls() {
        let adapter = Scripted::new(vec![Err(CallErrorKind::ModelLoading)]);
        let gw = gateway(adapter.clone(), ProviderKind::HttpChat, 3);
        let inv = gw.invoke("p", "prompt").await;
        assert_eq!(inv.outcome, Outcome::Sentinel(Sentinel::ModelLoading));
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn permanent_failures_make_one_call() {
        for (kind, sentinel) in [
            (CallErrorKind::ModelUnavailable, Sentinel::ModelNotAvailable),
            (CallErrorKind::QuotaExceeded, Sentinel::QuotaExceeded),
            (CallErrorKind::Provider, Sentinel::Error),
        ] {
            let adapter = Scripted::new(vec![Err(kind)]);
            let gw = gateway(adapter.clone(), ProviderKind::DirectSdk, 3);
            let inv = gw.invoke("p", "prompt").await;
            assert_eq!(inv.outcome, Outcome::Sentinel(sentinel));
            assert_eq!(adapter.calls(), 1, "{kind:?}");
        }
    }

    #[tokio::test]
    async fn transient_exhaustion_is_error() {
        let adapter = Scripted::new(vec![Err(CallErrorKind::Transient)]);
        let gw = gateway(adapter.clone(), ProviderKind::DirectSdk, 2);
        let inv = gw.invoke("p", "prompt").await;
        assert_eq!(inv.outcome, Outcome::Sentinel(Sentinel::Error));
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn unknown_provider_yields_error_without_calls() {
        let adapter = Scripted::new(vec![Ok("LOOP_COND")]);
        let gw = gateway(adapter.clone(), ProviderKind::HttpChat, 3);
        let inv = gw.invoke("missing", "prompt").await;
        assert_eq!(inv.outcome, Outcome::Sentinel(Sentinel::Error));
        assert_eq!(inv.attempts, 0);
        assert_eq!(adapter.calls(), 0);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let adapter = Scripted::new(vec![Ok("LOOP_COND")]);
        let gw = gateway(adapter.clone(), ProviderKind::HttpChat, 3);
        let err = gw
            .with_provider(ProviderSlot::new("p", ProviderKind::HttpChat, "m", adapter))
            .unwrap_err();
        assert_eq!(err.kind(), CallErrorKind::Config);
    }

    #[test]
    fn log_truncation_respects_char_boundaries() {
        let long = "é".repeat(200);
        let out = truncate_for_log(&long);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 123);
    }
}
