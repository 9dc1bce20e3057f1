//! Run orchestrator: drives every sample through every provider, in order,
//! with checkpoint/resume.
//!
//! Sequential by construction. Each sample is fully classified by every
//! active provider before the next one starts, so the stored result sequence
//! is always a prefix of the sample sequence and `results.len()` is the resume
//! offset.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::sleep;

use crate::checkpoint::{CheckpointError, CheckpointStore, ClassificationResult};
use crate::dataset::Sample;
use crate::gateway::{ClassifierGateway, Invocation};
use crate::prompts::{PromptTemplate, DEFAULT_PROMPT};
use crate::taxonomy::Taxonomy;
use crate::trace::{now_epoch_ms, prompt_hash, ClassificationTrace, TraceSink};

pub const DEFAULT_CHECKPOINT_EVERY: usize = 50;
pub const DEFAULT_INTER_SAMPLE_DELAY: Duration = Duration::from_secs(3);
const PROGRESS_EVERY: usize = 10;

// =============================================================================
// CONFIG / STATE
// =============================================================================

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Save after every K newly processed samples.
    pub checkpoint_every: usize,
    /// Wait between consecutive samples (never after the last one).
    pub inter_sample_delay: Duration,
    pub prompt: PromptTemplate,
    /// Fill in providers missing from already-stored results before
    /// continuing at the offset.
    pub backfill: bool,
    pub run_id: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            inter_sample_delay: DEFAULT_INTER_SAMPLE_DELAY,
            prompt: DEFAULT_PROMPT,
            backfill: false,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Finished,
    Aborted,
    Interrupted,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Finished => "finished",
            RunPhase::Aborted => "aborted",
            RunPhase::Interrupted => "interrupted",
        }
    }
}

/// Per-provider counters for one orchestrator invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderStats {
    pub provider: String,
    /// Invocations that produced a canonical category.
    pub valid: usize,
    /// Invocations that ended in a sentinel, `PARSE_ERROR` included.
    pub errors: usize,
    /// Calls beyond the first, summed over invocations.
    pub retries: u32,
    /// Sentinel histogram.
    pub failures: std::collections::BTreeMap<String, usize>,
}

impl ProviderStats {
    fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    fn observe(&mut self, invocation: &Invocation) {
        self.retries += invocation.retries();
        if invocation.outcome.is_category() {
            self.valid += 1;
        } else {
            self.errors += 1;
            *self
                .failures
                .entry(invocation.outcome.as_str().to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.valid + self.errors
    }

    pub fn valid_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.valid as f64 / self.total() as f64
        }
    }
}

/// Everything one run owns. Never shared between orchestrator invocations.
#[derive(Debug)]
pub struct RunState {
    run_id: String,
    samples: Vec<Sample>,
    providers: Vec<String>,
    results: Vec<ClassificationResult>,
    offset: usize,
    resumed_from: usize,
    backfilled: usize,
    stats: Vec<ProviderStats>,
    phase: RunPhase,
    started: Instant,
}

impl RunState {
    fn new(run_id: String, samples: Vec<Sample>, providers: Vec<String>) -> Self {
        let stats = providers.iter().map(|p| ProviderStats::new(p)).collect();
        Self {
            run_id,
            samples,
            providers,
            results: Vec::new(),
            offset: 0,
            resumed_from: 0,
            backfilled: 0,
            stats,
            phase: RunPhase::Idle,
            started: Instant::now(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn results(&self) -> &[ClassificationResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ClassificationResult> {
        self.results
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    pub fn stats(&self) -> &[ProviderStats] {
        &self.stats
    }

    fn push(&mut self, result: ClassificationResult) {
        self.results.push(result);
        self.offset += 1;
        debug_assert_eq!(self.results.len(), self.offset);
    }

    fn observe(&mut self, provider_index: usize, invocation: &Invocation) {
        if let Some(stats) = self.stats.get_mut(provider_index) {
            stats.observe(invocation);
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            phase: self.phase,
            total_samples: self.samples.len(),
            completed: self.offset,
            resumed_from: self.resumed_from,
            processed: self.offset - self.resumed_from,
            backfilled: self.backfilled,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            providers: self.stats.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub phase: RunPhase,
    pub total_samples: usize,
    /// Stored results after this run (the resume offset).
    pub completed: usize,
    /// Offset this run started at.
    pub resumed_from: usize,
    /// Samples newly processed by this run.
    pub processed: usize,
    /// Stored results that had missing providers filled in.
    pub backfilled: usize,
    pub elapsed_ms: u64,
    pub providers: Vec<ProviderStats>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error(
        "checkpoint does not match samples at index {index}: expected {expected}, found {found}"
    )]
    Mismatch {
        index: usize,
        expected: String,
        found: String,
    },
    #[error("checkpoint holds {stored} results but only {samples} samples were loaded")]
    CheckpointAhead { stored: usize, samples: usize },
    #[error("no providers configured")]
    NoProviders,
    /// A checkpoint save failed mid-run. Carries the counters gathered so far;
    /// the last successful save is still on disk.
    #[error(
        "checkpoint save failed after {} of {} samples: {source}",
        .summary.completed,
        .summary.total_samples
    )]
    SaveFailed {
        summary: Box<RunSummary>,
        #[source]
        source: CheckpointError,
    },
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

pub struct Orchestrator<'a> {
    gateway: &'a ClassifierGateway,
    store: &'a dyn CheckpointStore,
    taxonomy: &'a Taxonomy,
    config: RunConfig,
    trace: Option<&'a dyn TraceSink>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        gateway: &'a ClassifierGateway,
        store: &'a dyn CheckpointStore,
        taxonomy: &'a Taxonomy,
        config: RunConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            taxonomy,
            config,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: &'a dyn TraceSink) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Classify `samples`, resuming from whatever the store already holds.
    ///
    /// Returns the final state (phase `Finished` or `Interrupted`). Fatal
    /// faults return an error and leave the last saved checkpoint intact.
    pub async fn run(
        &self,
        samples: Vec<Sample>,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<RunState, RunError> {
        let providers = self.gateway.provider_names();
        let mut state = RunState::new(self.config.run_id.clone(), samples, providers);
        if state.providers.is_empty() {
            state.phase = RunPhase::Aborted;
            tracing::error!(run_id = %state.run_id, phase = state.phase.as_str(), "no providers; run aborted");
            return Err(RunError::NoProviders);
        }

        let stored = match self.load_aligned(&state.samples) {
            Ok(stored) => stored,
            Err(err) => {
                state.phase = RunPhase::Aborted;
                tracing::error!(
                    run_id = %state.run_id,
                    phase = state.phase.as_str(),
                    error = %err,
                    "run aborted"
                );
                return Err(err);
            }
        };
        state.offset = stored.len();
        state.resumed_from = stored.len();
        state.results = stored;
        state.phase = RunPhase::Running;

        tracing::info!(
            run_id = %state.run_id,
            samples = state.samples.len(),
            offset = state.offset,
            providers = ?state.providers,
            prompt = self.config.prompt.slug,
            "run started"
        );

        if self.config.backfill && state.offset > 0 {
            if !self.backfill(&mut state, cancel_flag).await? {
                return Ok(state);
            }
        }

        let checkpoint_every = self.config.checkpoint_every.max(1);
        let session_start = Instant::now();
        let mut since_save = 0usize;

        while state.offset < state.samples.len() {
            if cancelled(cancel_flag) {
                return self.interrupt(state);
            }

            let index = state.offset;
            let sample = state.samples[index].clone();
            let result = self.classify(&mut state, index, &sample, None).await;
            state.push(result);
            since_save += 1;

            if since_save >= checkpoint_every {
                self.save(&mut state)?;
                since_save = 0;
            }

            let processed = state.offset - state.resumed_from;
            if processed % PROGRESS_EVERY == 0 {
                log_progress(&state, processed, session_start.elapsed());
            }

            if state.offset < state.samples.len() {
                pause(self.config.inter_sample_delay).await;
            }
        }

        self.save(&mut state)?;
        state.phase = RunPhase::Finished;
        let summary = state.summary();
        tracing::info!(
            run_id = %summary.run_id,
            completed = summary.completed,
            processed = summary.processed,
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        log_provider_stats(&summary);
        Ok(state)
    }

    /// Persist the current results. A failed save aborts the run; the error
    /// keeps the summary so the counters are not lost with the state.
    fn save(&self, state: &mut RunState) -> Result<(), RunError> {
        let Err(source) = self.store.save(&state.results) else {
            return Ok(());
        };
        state.phase = RunPhase::Aborted;
        let summary = state.summary();
        tracing::error!(
            run_id = %summary.run_id,
            phase = summary.phase.as_str(),
            completed = summary.completed,
            processed = summary.processed,
            error = %source,
            "checkpoint save failed; run aborted"
        );
        log_provider_stats(&summary);
        Err(RunError::SaveFailed {
            summary: Box::new(summary),
            source,
        })
    }

    /// Load the stored prefix and verify it lines up with `samples`.
    fn load_aligned(&self, samples: &[Sample]) -> Result<Vec<ClassificationResult>, RunError> {
        let stored = self.store.load()?;
        if stored.len() > samples.len() {
            return Err(RunError::CheckpointAhead {
                stored: stored.len(),
                samples: samples.len(),
            });
        }
        for (index, (result, sample)) in stored.iter().zip(samples).enumerate() {
            if result.unified_id != sample.unified_id {
                return Err(RunError::Mismatch {
                    index,
                    expected: sample.unified_id.clone(),
                    found: result.unified_id.clone(),
                });
            }
        }
        Ok(stored)
    }

    /// Fill in missing providers on stored results. Returns `false` when the
    /// run was interrupted.
    async fn backfill(
        &self,
        state: &mut RunState,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<bool, RunError> {
        let checkpoint_every = self.config.checkpoint_every.max(1);
        let pending: Vec<usize> = (0..state.offset)
            .filter(|&i| !state.results[i].missing_providers(&state.providers).is_empty())
            .collect();
        if pending.is_empty() {
            return Ok(true);
        }
        tracing::info!(pending = pending.len(), "backfilling stored results");

        let mut since_save = 0usize;
        for (n, &index) in pending.iter().enumerate() {
            if cancelled(cancel_flag) {
                if since_save > 0 {
                    self.save(state)?;
                }
                state.phase = RunPhase::Interrupted;
                tracing::warn!(backfilled = state.backfilled, "run interrupted during backfill");
                return Ok(false);
            }

            let sample = state.samples[index].clone();
            let existing = state.results[index].clone();
            let filled = self.classify(state, index, &sample, Some(existing)).await;
            state.results[index] = filled;
            state.backfilled += 1;
            since_save += 1;

            if since_save >= checkpoint_every {
                self.save(state)?;
                since_save = 0;
            }
            if n + 1 < pending.len() {
                pause(self.config.inter_sample_delay).await;
            }
        }
        self.save(state)?;
        tracing::info!(backfilled = state.backfilled, "backfill complete");
        Ok(true)
    }

    /// Classify one sample with every active provider missing from `base`
    /// (all of them when `base` is `None`). Stored outcomes are never
    /// overwritten.
    async fn classify(
        &self,
        state: &mut RunState,
        index: usize,
        sample: &Sample,
        base: Option<ClassificationResult>,
    ) -> ClassificationResult {
        let backfill = base.is_some();
        let mut result = base.unwrap_or_else(|| ClassificationResult::for_sample(sample));
        let prompt = self.config.prompt.render(sample, self.taxonomy);
        let hash = self.trace.map(|_| prompt_hash(&prompt));

        let todo: Vec<(usize, String)> = state
            .providers
            .iter()
            .enumerate()
            .filter(|(_, p)| result.outcome(p).is_none())
            .map(|(i, p)| (i, p.clone()))
            .collect();

        for (n, (provider_index, provider)) in todo.iter().enumerate() {
            let invocation = self.gateway.invoke(provider, &prompt).await;
            state.observe(*provider_index, &invocation);

            if let (Some(trace), Some(hash)) = (self.trace, hash.as_deref()) {
                let event = ClassificationTrace {
                    timestamp_ms: now_epoch_ms(),
                    run_id: state.run_id.clone(),
                    sample_index: index,
                    unified_id: sample.unified_id.clone(),
                    provider: provider.clone(),
                    model: self
                        .gateway
                        .provider(provider)
                        .map(|slot| slot.model().to_string())
                        .unwrap_or_default(),
                    prompt_template_slug: self.config.prompt.slug.to_string(),
                    prompt_hash: hash.to_string(),
                    outcome: invocation.outcome.as_str().to_string(),
                    attempts: invocation.attempts,
                    last_error: invocation.last_error.map(str::to_string),
                    elapsed_ms: invocation.elapsed.as_millis() as u64,
                    response: invocation.response.clone(),
                    backfill,
                };
                if let Err(err) = trace.record(event) {
                    tracing::warn!(error = %err, "failed to record trace event");
                }
            }

            result.set_outcome(provider.clone(), invocation.outcome);

            if n + 1 < todo.len() {
                if let Some(slot) = self.gateway.provider(provider) {
                    pause(slot.pacing_delay()).await;
                }
            }
        }
        result
    }

    fn interrupt(&self, mut state: RunState) -> Result<RunState, RunError> {
        self.save(&mut state)?;
        state.phase = RunPhase::Interrupted;
        tracing::warn!(
            run_id = %state.run_id,
            offset = state.offset,
            "run interrupted; checkpoint saved"
        );
        Ok(state)
    }
}

fn cancelled(flag: Option<&AtomicBool>) -> bool {
    flag.map(|f| f.load(AtomicOrdering::Relaxed)).unwrap_or(false)
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

fn log_provider_stats(summary: &RunSummary) {
    for stats in &summary.providers {
        tracing::info!(
            provider = %stats.provider,
            valid = stats.valid,
            errors = stats.errors,
            retries = stats.retries,
            valid_rate = stats.valid_rate(),
            "provider summary"
        );
    }
}

fn log_progress(state: &RunState, processed: usize, elapsed: Duration) {
    let remaining = state.samples.len() - state.offset;
    let per_sample = elapsed.as_secs_f64() / processed.max(1) as f64;
    let eta_secs = (per_sample * remaining as f64).round() as u64;
    tracing::info!(
        completed = state.offset,
        total = state.samples.len(),
        elapsed_secs = elapsed.as_secs(),
        eta_secs,
        "progress"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        CallError, CompletionProvider, CompletionRequest, CompletionResponse, NoopUsageSink,
        ProviderKind, ProviderSlot, RetryPolicy,
    };
    use crate::taxonomy::{CategoryCode, Outcome, Sentinel};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<ClassificationResult>>,
        saves: AtomicU32,
        /// Saves numbered at or past this one fail.
        fail_from: Option<u32>,
    }

    impl CheckpointStore for MemoryStore {
        fn load(&self) -> Result<Vec<ClassificationResult>, CheckpointError> {
            Ok(self.saved.lock().unwrap().clone())
        }

        fn save(&self, results: &[ClassificationResult]) -> Result<(), CheckpointError> {
            let n = self.saves.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            if self.fail_from.is_some_and(|limit| n >= limit) {
                return Err(CheckpointError::Io {
                    path: "memory".into(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            *self.saved.lock().unwrap() = results.to_vec();
            Ok(())
        }
    }

    /// Always answers with the same text; counts calls.
    struct Fixed {
        text: &'static str,
        calls: AtomicU32,
    }

    impl Fixed {
        fn new(text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                text,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for Fixed {
        async fn complete(&self, _req: &CompletionRequest) -> Result<CompletionResponse, CallError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(CompletionResponse::text(self.text))
        }
    }

    fn gateway(providers: &[(&str, Arc<Fixed>)]) -> ClassifierGateway {
        let mut gw = ClassifierGateway::new(Arc::new(NoopUsageSink));
        for (name, adapter) in providers {
            gw.add_provider(
                ProviderSlot::new(*name, ProviderKind::HttpChat, "m", adapter.clone())
                    .retry(RetryPolicy::immediate(1)),
            )
            .unwrap();
        }
        gw
    }

    fn samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new(format!("S{i}"), "D", "Python", "x = 1"))
            .collect()
    }

    fn config(checkpoint_every: usize) -> RunConfig {
        RunConfig {
            checkpoint_every,
            inter_sample_delay: Duration::ZERO,
            ..RunConfig::default()
        }
    }

    #[tokio::test]
    async fn classifies_every_sample_in_order() {
        let a = Fixed::new("LOOP_COND");
        let b = Fixed::new("no idea");
        let gw = gateway(&[("a", a.clone()), ("b", b.clone())]);
        let store = MemoryStore::default();
        let taxonomy = Taxonomy::default();

        let state = Orchestrator::new(&gw, &store, &taxonomy, config(2))
            .run(samples(5), None)
            .await
            .unwrap();

        assert_eq!(state.phase(), RunPhase::Finished);
        assert_eq!(state.offset(), 5);
        let ids: Vec<_> = state.results().iter().map(|r| r.unified_id.as_str()).collect();
        assert_eq!(ids, ["S0", "S1", "S2", "S3", "S4"]);
        assert_eq!(
            state.results()[0].outcome("a"),
            Some(&Outcome::Category(CategoryCode::LoopCond))
        );
        assert_eq!(
            state.results()[0].outcome("b"),
            Some(&Outcome::Sentinel(Sentinel::ParseError))
        );
        // cadence 2 over 5 samples: saves at 2 and 4, then the final save
        assert_eq!(store.saves.load(AtomicOrdering::SeqCst), 3);
        assert_eq!(store.load().unwrap().len(), 5);

        let summary = state.summary();
        assert_eq!(summary.providers[0].valid, 5);
        assert_eq!(summary.providers[1].errors, 5);
        assert_eq!(summary.providers[1].failures.get("PARSE_ERROR"), Some(&5));
    }

    #[tokio::test]
    async fn failed_save_aborts_and_keeps_the_counters() {
        let a = Fixed::new("VAR_INIT");
        let gw = gateway(&[("a", a.clone())]);
        let store = MemoryStore {
            fail_from: Some(2),
            ..MemoryStore::default()
        };
        let taxonomy = Taxonomy::default();

        let err = Orchestrator::new(&gw, &store, &taxonomy, config(2))
            .run(samples(5), None)
            .await
            .unwrap_err();

        let (summary, source) = match err {
            RunError::SaveFailed { summary, source } => (summary, source),
            other => panic!("expected SaveFailed, got {other:?}"),
        };
        assert!(matches!(source, CheckpointError::Io { .. }));
        assert_eq!(summary.phase, RunPhase::Aborted);
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.providers[0].valid, 4);
        // stopped at the failing save
        assert_eq!(a.calls.load(AtomicOrdering::SeqCst), 4);
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resume_keeps_stored_prefix_untouched() {
        let a = Fixed::new("COMPUTATION");
        let gw = gateway(&[("a", a.clone())]);
        let taxonomy = Taxonomy::default();
        let store = MemoryStore::default();

        let mut prefix = Vec::new();
        for s in samples(2) {
            let mut r = ClassificationResult::for_sample(&s);
            r.set_outcome("a", CategoryCode::VarInit.into());
            prefix.push(r);
        }
        store.save(&prefix).unwrap();

        let state = Orchestrator::new(&gw, &store, &taxonomy, config(50))
            .run(samples(4), None)
            .await
            .unwrap();

        assert_eq!(state.results().len(), 4);
        assert_eq!(&state.results()[..2], &prefix[..]);
        assert_eq!(
            state.results()[3].outcome("a"),
            Some(&Outcome::Category(CategoryCode::Computation))
        );
        assert_eq!(a.calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(state.summary().resumed_from, 2);
    }

    #[tokio::test]
    async fn misaligned_checkpoint_aborts_before_any_call() {
        let a = Fixed::new("COMPUTATION");
        let gw = gateway(&[("a", a.clone())]);
        let taxonomy = Taxonomy::default();
        let store = MemoryStore::default();
        store
            .save(&[ClassificationResult::for_sample(&Sample::new(
                "other", "D", "C", "",
            ))])
            .unwrap();

        let err = Orchestrator::new(&gw, &store, &taxonomy, config(50))
            .run(samples(3), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Mismatch { index: 0, .. }));
        assert_eq!(a.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn checkpoint_longer_than_samples_aborts() {
        let gw = gateway(&[("a", Fixed::new("COMPUTATION"))]);
        let taxonomy = Taxonomy::default();
        let store = MemoryStore::default();
        let stored: Vec<_> = samples(3).iter().map(ClassificationResult::for_sample).collect();
        store.save(&stored).unwrap();

        let err = Orchestrator::new(&gw, &store, &taxonomy, config(50))
            .run(samples(2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::CheckpointAhead { stored: 3, samples: 2 }));
    }

    #[tokio::test]
    async fn cancel_flag_saves_and_interrupts() {
        let gw = gateway(&[("a", Fixed::new("IO_FORMAT"))]);
        let taxonomy = Taxonomy::default();
        let store = MemoryStore::default();
        let cancel = AtomicBool::new(true);

        let state = Orchestrator::new(&gw, &store, &taxonomy, config(50))
            .run(samples(3), Some(&cancel))
            .await
            .unwrap();
        assert_eq!(state.phase(), RunPhase::Interrupted);
        assert_eq!(state.offset(), 0);
        assert_eq!(store.saves.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backfill_fills_only_missing_providers() {
        let a = Fixed::new("DATA_TYPE");
        let b = Fixed::new("VAR_INIT");
        let gw = gateway(&[("a", a.clone()), ("b", b.clone())]);
        let taxonomy = Taxonomy::default();
        let store = MemoryStore::default();

        let mut stored = Vec::new();
        for s in samples(2) {
            let mut r = ClassificationResult::for_sample(&s);
            r.set_outcome("a", Sentinel::RateLimited.into());
            stored.push(r);
        }
        store.save(&stored).unwrap();

        let run_config = RunConfig {
            backfill: true,
            ..config(50)
        };
        let state = Orchestrator::new(&gw, &store, &taxonomy, run_config)
            .run(samples(2), None)
            .await
            .unwrap();

        assert_eq!(state.summary().backfilled, 2);
        for r in state.results() {
            assert_eq!(r.outcome("a"), Some(&Outcome::Sentinel(Sentinel::RateLimited)));
            assert_eq!(r.outcome("b"), Some(&Outcome::Category(CategoryCode::VarInit)));
        }
        assert_eq!(a.calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(b.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn without_backfill_stored_results_are_left_alone() {
        let b = Fixed::new("VAR_INIT");
        let gw = gateway(&[("a", Fixed::new("DATA_TYPE")), ("b", b.clone())]);
        let taxonomy = Taxonomy::default();
        let store = MemoryStore::default();
        let mut r = ClassificationResult::for_sample(&samples(1)[0]);
        r.set_outcome("a", CategoryCode::DataType.into());
        store.save(&[r]).unwrap();

        let state = Orchestrator::new(&gw, &store, &taxonomy, config(50))
            .run(samples(1), None)
            .await
            .unwrap();
        assert_eq!(state.results()[0].outcome("b"), None);
        assert_eq!(b.calls.load(AtomicOrdering::SeqCst), 0);
    }
}
