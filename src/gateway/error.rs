//! Error types for provider calls.

use thiserror::Error;

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "RESOURCE_EXHAUSTED").
    pub provider_code: Option<String>,
    /// Request ID from provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Classified failure of a single provider call.
#[derive(Debug, Error)]
pub enum CallError {
    /// Network failure or timeout - retry after a short fixed wait.
    #[error("transient error: {message}")]
    Transient {
        message: String,
        context: Option<ErrorContext>,
    },

    /// HTTP 429 from a chat-completion backend - retry with backoff.
    #[error("rate limited")]
    RateLimited { context: Option<ErrorContext> },

    /// HTTP 503: the backend is cold-starting the model.
    #[error("model loading")]
    ModelLoading { context: Option<ErrorContext> },

    /// HTTP 400: the model id is not served for this account. Permanent.
    #[error("model unavailable: {message}")]
    ModelUnavailable {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Provider-reported quota exhaustion. Permanent for this run.
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Anything else the provider reported.
    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Configuration error (missing API key, bad header value, ...).
    #[error("configuration error: {0}")]
    Config(String),
}

/// Fieldless discriminant of [`CallError`], used to key retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    Transient,
    RateLimited,
    ModelLoading,
    ModelUnavailable,
    QuotaExceeded,
    Provider,
    Config,
}

impl CallError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            context: None,
        }
    }

    pub fn rate_limited(context: ErrorContext) -> Self {
        Self::RateLimited {
            context: Some(context),
        }
    }

    pub fn model_loading(context: ErrorContext) -> Self {
        Self::ModelLoading {
            context: Some(context),
        }
    }

    pub fn model_unavailable(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ModelUnavailable {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn quota_exceeded(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::QuotaExceeded {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            context: None,
        }
    }

    pub fn provider_with_context(
        provider: &'static str,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify a reqwest failure. Timeouts and connection-level failures are
    /// transient; body/decoding failures are provider errors.
    pub fn from_transport(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::transient(format!("timeout: {err}"));
        }
        if err.is_connect() || err.is_request() {
            return Self::transient(format!("connection failed: {err}"));
        }
        Self::provider(provider, err.to_string())
    }

    pub fn kind(&self) -> CallErrorKind {
        match self {
            Self::Transient { .. } => CallErrorKind::Transient,
            Self::RateLimited { .. } => CallErrorKind::RateLimited,
            Self::ModelLoading { .. } => CallErrorKind::ModelLoading,
            Self::ModelUnavailable { .. } => CallErrorKind::ModelUnavailable,
            Self::QuotaExceeded { .. } => CallErrorKind::QuotaExceeded,
            Self::Provider { .. } => CallErrorKind::Provider,
            Self::Config(_) => CallErrorKind::Config,
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::RateLimited { .. } => "rate_limited",
            Self::ModelLoading { .. } => "model_loading",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Provider { .. } => "provider_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::Transient { context, .. } => context.as_ref(),
            Self::RateLimited { context } => context.as_ref(),
            Self::ModelLoading { context } => context.as_ref(),
            Self::ModelUnavailable { context, .. } => context.as_ref(),
            Self::QuotaExceeded { context, .. } => context.as_ref(),
            Self::Provider { context, .. } => context.as_ref(),
            Self::Config(_) => None,
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}
