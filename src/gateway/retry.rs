//! Per-provider retry/backoff table.
//!
//! Each error kind has its own rule: transient failures wait a fixed short
//! interval, rate limits back off (linearly or at a fixed interval), cold
//! starts get one long wait, and permanent failures give up at once.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::taxonomy::Sentinel;

use super::error::CallErrorKind;
use super::types::ProviderKind;

/// How the rate-limit wait grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `attempt × base`.
    #[default]
    Linear,
    /// `base` every time.
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per invocation, first call included.
    pub max_attempts: u32,
    pub transient_delay: Duration,
    pub rate_limit_delay: Duration,
    pub rate_limit_backoff: Backoff,
    pub model_loading_delay: Duration,
    /// Cold-start retries allowed per invocation.
    pub model_loading_retries: u32,
}

/// What the controller does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp(Sentinel),
}

impl RetryPolicy {
    /// Chat-completion routers: 3 attempts, linear 429 backoff.
    pub fn http_chat() -> Self {
        Self {
            max_attempts: 3,
            transient_delay: Duration::from_secs(10),
            rate_limit_delay: Duration::from_secs(15),
            rate_limit_backoff: Backoff::Linear,
            model_loading_delay: Duration::from_secs(20),
            model_loading_retries: 1,
        }
    }

    /// Generate-content API: 2 attempts. Its 429 is a quota signal and never
    /// reaches the rate-limit rule, but the rule is still defined.
    pub fn direct_sdk() -> Self {
        Self {
            max_attempts: 2,
            transient_delay: Duration::from_secs(5),
            rate_limit_delay: Duration::from_secs(10),
            rate_limit_backoff: Backoff::Fixed,
            model_loading_delay: Duration::from_secs(20),
            model_loading_retries: 1,
        }
    }

    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::HttpChat => Self::http_chat(),
            ProviderKind::DirectSdk => Self::direct_sdk(),
        }
    }

    /// Same rules with every wait set to zero.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            transient_delay: Duration::ZERO,
            rate_limit_delay: Duration::ZERO,
            rate_limit_backoff: Backoff::Linear,
            model_loading_delay: Duration::ZERO,
            model_loading_retries: 1,
        }
    }

    /// Wait before the next attempt after a 429 on `attempt` (1-based).
    pub fn rate_limit_wait(&self, attempt: u32) -> Duration {
        match self.rate_limit_backoff {
            Backoff::Linear => self
                .rate_limit_delay
                .checked_mul(attempt.max(1))
                .unwrap_or(Duration::MAX),
            Backoff::Fixed => self.rate_limit_delay,
        }
    }

    /// Decide after attempt number `attempt` (1-based) failed with `kind`.
    /// `loading_retries_used` counts cold-start retries already spent.
    pub fn decide(
        &self,
        kind: CallErrorKind,
        attempt: u32,
        loading_retries_used: u32,
    ) -> RetryDecision {
        let budget_left = attempt < self.max_attempts;
        match kind {
            CallErrorKind::Transient if budget_left => RetryDecision::Retry(self.transient_delay),
            CallErrorKind::Transient => RetryDecision::GiveUp(Sentinel::Error),
            CallErrorKind::RateLimited if budget_left => {
                RetryDecision::Retry(self.rate_limit_wait(attempt))
            }
            CallErrorKind::RateLimited => RetryDecision::GiveUp(Sentinel::RateLimited),
            CallErrorKind::ModelLoading
                if budget_left && loading_retries_used < self.model_loading_retries =>
            {
                RetryDecision::Retry(self.model_loading_delay)
            }
            CallErrorKind::ModelLoading => RetryDecision::GiveUp(Sentinel::ModelLoading),
            CallErrorKind::ModelUnavailable => RetryDecision::GiveUp(Sentinel::ModelNotAvailable),
            CallErrorKind::QuotaExceeded => RetryDecision::GiveUp(Sentinel::QuotaExceeded),
            CallErrorKind::Provider | CallErrorKind::Config => {
                RetryDecision::GiveUp(Sentinel::Error)
            }
        }
    }
}

/// Optional per-provider overrides read from config; unset fields keep the
/// provider kind's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub transient_delay_ms: Option<u64>,
    pub rate_limit_delay_ms: Option<u64>,
    pub rate_limit_backoff: Option<Backoff>,
    pub model_loading_delay_ms: Option<u64>,
    pub model_loading_retries: Option<u32>,
}

impl RetryOverrides {
    pub fn apply(&self, mut policy: RetryPolicy) -> Result<RetryPolicy, String> {
        if let Some(v) = self.max_attempts {
            if v == 0 {
                return Err("retry.max_attempts must be >= 1".to_string());
            }
            policy.max_attempts = v;
        }
        if let Some(v) = self.transient_delay_ms {
            policy.transient_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.rate_limit_delay_ms {
            policy.rate_limit_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.rate_limit_backoff {
            policy.rate_limit_backoff = v;
        }
        if let Some(v) = self.model_loading_delay_ms {
            policy.model_loading_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.model_loading_retries {
            policy.model_loading_retries = v;
        }
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let policy = RetryPolicy::http_chat();
        assert_eq!(policy.rate_limit_wait(1), Duration::from_secs(15));
        assert_eq!(policy.rate_limit_wait(2), Duration::from_secs(30));

        let fixed = RetryPolicy::direct_sdk();
        assert_eq!(fixed.rate_limit_wait(1), fixed.rate_limit_wait(2));
    }

    #[test]
    fn linear_backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy {
            rate_limit_delay: Duration::from_secs(u64::MAX / 2),
            ..RetryPolicy::http_chat()
        };
        assert_eq!(policy.rate_limit_wait(u32::MAX), Duration::MAX);
        assert_eq!(
            policy.rate_limit_wait(1),
            Duration::from_secs(u64::MAX / 2)
        );
    }

    #[test]
    fn rate_limit_exhaustion_yields_rate_limited() {
        let policy = RetryPolicy::http_chat();
        assert!(matches!(
            policy.decide(CallErrorKind::RateLimited, 2, 0),
            RetryDecision::Retry(_)
        ));
        assert_eq!(
            policy.decide(CallErrorKind::RateLimited, 3, 0),
            RetryDecision::GiveUp(Sentinel::RateLimited)
        );
    }

    #[test]
    fn model_loading_retries_once() {
        let policy = RetryPolicy::http_chat();
        assert_eq!(
            policy.decide(CallErrorKind::ModelLoading, 1, 0),
            RetryDecision::Retry(Duration::from_secs(20))
        );
        assert_eq!(
            policy.decide(CallErrorKind::ModelLoading, 2, 1),
            RetryDecision::GiveUp(Sentinel::ModelLoading)
        );
    }

    #[test]
    fn permanent_failures_never_retry() {
        let policy = RetryPolicy::http_chat();
        assert_eq!(
            policy.decide(CallErrorKind::ModelUnavailable, 1, 0),
            RetryDecision::GiveUp(Sentinel::ModelNotAvailable)
        );
        assert_eq!(
            policy.decide(CallErrorKind::QuotaExceeded, 1, 0),
            RetryDecision::GiveUp(Sentinel::QuotaExceeded)
        );
        assert_eq!(
            policy.decide(CallErrorKind::Provider, 1, 0),
            RetryDecision::GiveUp(Sentinel::Error)
        );
    }

    #[test]
    fn transient_exhaustion_yields_error() {
        let policy = RetryPolicy::direct_sdk();
        assert_eq!(
            policy.decide(CallErrorKind::Transient, 1, 0),
            RetryDecision::Retry(Duration::from_secs(5))
        );
        assert_eq!(
            policy.decide(CallErrorKind::Transient, 2, 0),
            RetryDecision::GiveUp(Sentinel::Error)
        );
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let overrides = RetryOverrides {
            max_attempts: Some(2),
            rate_limit_backoff: Some(Backoff::Fixed),
            rate_limit_delay_ms: Some(500),
            ..Default::default()
        };
        let policy = overrides.apply(RetryPolicy::http_chat()).unwrap();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.rate_limit_wait(2), Duration::from_millis(500));
        assert_eq!(policy.transient_delay, Duration::from_secs(10));

        let bad = RetryOverrides {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(bad.apply(RetryPolicy::http_chat()).is_err());
    }
}
