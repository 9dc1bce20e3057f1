//! Provider and run configuration.
//!
//! One JSON file lists the providers in call order plus run settings. API keys
//! are given inline or, preferably, through `api_key_env`. Every problem is
//! reported here, before any provider is called.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::gemini::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_TIMEOUT};
use crate::gateway::http_chat::{DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_TIMEOUT};
use crate::gateway::{
    ClassifierGateway, CompletionProvider, GeminiAdapter, HttpChatAdapter, ProviderKind,
    ProviderSlot, RetryOverrides, RetryPolicy, UsageSink,
};
use crate::normalize::NormalizerKind;

/// Result keys that provider names must not shadow.
const RESERVED_KEYS: [&str; 4] = ["unified_id", "source_dataset", "language", "timestamp"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("provider {provider}: {detail}")]
    MissingCredentials { provider: String, detail: String },
    #[error("provider {provider}: {source}")]
    Provider {
        provider: String,
        #[source]
        source: crate::gateway::CallError,
    },
}

// =============================================================================
// FILE SHAPE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriageConfig {
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub run: RunSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Result key and log label, e.g. "qwen".
    pub name: String,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub pacing_ms: Option<u64>,
    #[serde(default)]
    pub normalizer: NormalizerKind,
    #[serde(default)]
    pub retry: RetryOverrides,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    #[serde(default)]
    pub checkpoint_every: Option<usize>,
    #[serde(default)]
    pub inter_sample_delay_ms: Option<u64>,
    /// Prompt template slug.
    #[serde(default)]
    pub prompt: Option<String>,
}

// =============================================================================
// LOADING
// =============================================================================

impl TriageConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: TriageConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid("no providers configured".to_string()));
        }
        let mut seen = HashSet::new();
        for p in &self.providers {
            if p.name.trim().is_empty() {
                return Err(ConfigError::Invalid("provider name is empty".to_string()));
            }
            if RESERVED_KEYS.contains(&p.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "provider name {:?} collides with a result field",
                    p.name
                )));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider name {:?}",
                    p.name
                )));
            }
            if p.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider {}: model is empty",
                    p.name
                )));
            }
            p.retry_policy()?;
        }
        if self.run.checkpoint_every == Some(0) {
            return Err(ConfigError::Invalid(
                "run.checkpoint_every must be >= 1".to_string(),
            ));
        }
        if let Some(slug) = &self.run.prompt {
            if crate::prompts::prompt_by_slug(slug).is_none() {
                return Err(ConfigError::Invalid(format!("unknown prompt template {slug:?}")));
            }
        }
        Ok(())
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    /// Build the gateway with every configured provider, in file order.
    pub fn build_gateway(&self, usage_sink: Arc<dyn UsageSink>) -> Result<ClassifierGateway, ConfigError> {
        let mut gateway = ClassifierGateway::new(usage_sink);
        for provider in &self.providers {
            let slot = provider.build_slot()?;
            gateway
                .add_provider(slot)
                .map_err(|source| ConfigError::Provider {
                    provider: provider.name.clone(),
                    source,
                })?;
        }
        Ok(gateway)
    }
}

impl ProviderConfig {
    /// Inline key wins; otherwise the named environment variable.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.to_string());
        }
        let Some(var) = &self.api_key_env else {
            return Err(ConfigError::MissingCredentials {
                provider: self.name.clone(),
                detail: "neither api_key nor api_key_env is set".to_string(),
            });
        };
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingCredentials {
                provider: self.name.clone(),
                detail: format!("environment variable {var} is not set"),
            }),
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        self.retry
            .apply(RetryPolicy::for_kind(self.kind))
            .map_err(|detail| ConfigError::Invalid(format!("provider {}: {detail}", self.name)))
    }

    fn timeout(&self) -> Duration {
        match (self.timeout_secs, self.kind) {
            (Some(secs), _) => Duration::from_secs(secs),
            (None, ProviderKind::HttpChat) => DEFAULT_CHAT_TIMEOUT,
            (None, ProviderKind::DirectSdk) => DEFAULT_GEMINI_TIMEOUT,
        }
    }

    pub fn build_adapter(&self) -> Result<Arc<dyn CompletionProvider>, ConfigError> {
        let api_key = self.resolve_api_key()?;
        let wrap = |source| ConfigError::Provider {
            provider: self.name.clone(),
            source,
        };
        let adapter: Arc<dyn CompletionProvider> = match self.kind {
            ProviderKind::HttpChat => Arc::new(
                HttpChatAdapter::with_config(
                    api_key,
                    self.base_url.as_deref().unwrap_or(DEFAULT_CHAT_BASE_URL),
                    self.timeout(),
                )
                .map_err(wrap)?,
            ),
            ProviderKind::DirectSdk => Arc::new(
                GeminiAdapter::with_config(
                    api_key,
                    self.base_url.as_deref().unwrap_or(DEFAULT_GEMINI_BASE_URL),
                    self.timeout(),
                )
                .map_err(wrap)?,
            ),
        };
        Ok(adapter)
    }

    pub fn build_slot(&self) -> Result<ProviderSlot, ConfigError> {
        let adapter = self.build_adapter()?;
        let mut slot = ProviderSlot::new(&self.name, self.kind, &self.model, adapter)
            .retry(self.retry_policy()?)
            .normalizer(self.normalizer.build())
            .pacing(Duration::from_millis(self.pacing_ms.unwrap_or(0)));
        if let Some(max) = self.max_tokens {
            slot = slot.max_tokens(Some(max));
        }
        if let Some(t) = self.temperature {
            slot = slot.temperature(t);
        }
        Ok(slot)
    }
}
