#![forbid(unsafe_code)]

//! # triage-harness
//!
//! Classify buggy programs into seven logical-error categories by asking
//! several independent LLM providers, then measure where they disagree.
//!
//! Each sample is rendered into one prompt and sent to every configured
//! provider in a fixed order. Replies are normalized to a canonical category
//! code, or to a sentinel when no code could be obtained (rate limits, cold
//! starts, quota, unparseable text). Results are checkpointed so long runs
//! survive crashes and rate-limit stalls, and a post-hoc analysis reports
//! conflicts between providers.

pub mod checkpoint;
pub mod config;
pub mod conflict;
pub mod dataset;
pub mod gateway;
pub mod logging;
pub mod normalize;
pub mod orchestrator;
pub mod prompts;
pub mod report;
pub mod taxonomy;
pub mod trace;

pub use checkpoint::{
    load_results, write_results, CheckpointError, CheckpointStore, ClassificationResult,
    JsonCheckpointStore, ProviderOutcomes,
};
pub use config::{ConfigError, ProviderConfig, TriageConfig};
pub use conflict::{analyze, ConflictEntry, ConflictReport};
pub use dataset::{DatasetError, JsonSampleLoader, Sample, SampleLoader};
pub use gateway::{
    CallError, ClassifierGateway, CompletionProvider, Invocation, ProviderSlot, RetryPolicy,
    UsageSink,
};
pub use normalize::{normalize, Normalizer};
pub use orchestrator::{Orchestrator, RunConfig, RunError, RunPhase, RunState, RunSummary};
pub use taxonomy::{CategoryCode, Outcome, Sentinel, Taxonomy};
pub use trace::{ClassificationTrace, JsonlTraceSink, TraceError, TraceSink, TraceWorker};
