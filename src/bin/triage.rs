#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use triage_harness::checkpoint::{load_results, write_results, JsonCheckpointStore};
use triage_harness::config::TriageConfig;
use triage_harness::conflict::analyze;
use triage_harness::dataset::{JsonSampleLoader, SampleLoader};
use triage_harness::gateway::{CallErrorKind, TracingUsageSink};
use triage_harness::logging::{init_logging, LoggingConfig};
use triage_harness::orchestrator::{Orchestrator, RunConfig, RunPhase};
use triage_harness::prompts::{prompt_by_slug, PromptTemplate, DEFAULT_PROMPT, PROMPTS};
use triage_harness::report::{
    hash_results, provider_coverage, providers_in, render_conflict_markdown, render_run_markdown,
};
use triage_harness::taxonomy::Taxonomy;
use triage_harness::trace::{JsonlTraceSink, TraceSink};

#[derive(Parser)]
#[command(name = "triage", version, about = "Multi-provider logical-error classifier")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify samples with every configured provider (resumes from the checkpoint)
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        samples: PathBuf,
        #[arg(long, default_value = "predictions_checkpoint.json")]
        checkpoint: PathBuf,
        /// Final results file, written once every sample is classified
        #[arg(long)]
        out: Option<PathBuf>,
        /// Only the first N samples
        #[arg(long)]
        limit: Option<usize>,
        /// Subset of configured providers (comma-separated)
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
        #[arg(long)]
        taxonomy: Option<PathBuf>,
        /// Prompt template slug (overrides config)
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        checkpoint_every: Option<usize>,
        #[arg(long)]
        inter_sample_delay_ms: Option<u64>,
        /// Fill in providers missing from stored results before continuing
        #[arg(long)]
        backfill: bool,
        /// Append one JSON line per provider call
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Write the run summary as Markdown here instead of stdout
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Analyze provider disagreement in a results file
    Conflicts {
        #[arg(long)]
        results: PathBuf,
        /// Providers to compare, in label order (default: all found)
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
        /// Write the full report as JSON
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write the Markdown report here instead of stdout
        #[arg(long)]
        markdown: Option<PathBuf>,
        #[arg(long, default_value_t = 50)]
        max_entries: usize,
    },
    /// Show the category table
    Taxonomy {
        #[arg(long)]
        taxonomy: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Render the prompt for one sample
    Prompt {
        #[arg(long)]
        samples: PathBuf,
        /// Sample by position
        #[arg(long, default_value_t = 0)]
        index: usize,
        /// Sample by unified_id (overrides --index)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        taxonomy: Option<PathBuf>,
        /// List available templates and exit
        #[arg(long)]
        list: bool,
    },
    /// Send one short request to each provider and report reachability
    Probe {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
    },
}

const PROBE_PROMPT: &str = "Reply with exactly one word: LOOP_COND";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_verbosity(cli.verbose));

    match cli.command {
        Commands::Run {
            config,
            samples,
            checkpoint,
            out,
            limit,
            providers,
            taxonomy,
            prompt,
            checkpoint_every,
            inter_sample_delay_ms,
            backfill,
            trace,
            report,
        } => {
            let config = TriageConfig::load(&config)?;
            let taxonomy = load_taxonomy(taxonomy.as_deref())?;
            let template = resolve_template(prompt.as_deref().or(config.run.prompt.as_deref()))?;
            let samples = JsonSampleLoader::new(&samples).load_samples(limit)?;

            let mut gateway = config.build_gateway(Arc::new(TracingUsageSink))?;
            if !providers.is_empty() {
                gateway.retain(&providers)?;
            }

            let store = JsonCheckpointStore::new(&checkpoint);
            let _lock = store.lock_exclusive()?;

            let run_config = RunConfig {
                checkpoint_every: checkpoint_every
                    .or(config.run.checkpoint_every)
                    .unwrap_or(triage_harness::orchestrator::DEFAULT_CHECKPOINT_EVERY),
                inter_sample_delay: inter_sample_delay_ms
                    .or(config.run.inter_sample_delay_ms)
                    .map(Duration::from_millis)
                    .unwrap_or(triage_harness::orchestrator::DEFAULT_INTER_SAMPLE_DELAY),
                prompt: template,
                backfill,
                ..RunConfig::default()
            };

            let cancel = Arc::new(AtomicBool::new(false));
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("interrupt received; stopping after the current sample");
                        cancel.store(true, Ordering::Relaxed);
                    }
                });
            }

            let (trace_sink, trace_worker) = if let Some(path) = trace {
                let (sink, worker) = JsonlTraceSink::new(path)?;
                (Some(sink), Some(worker))
            } else {
                (None, None)
            };

            let mut orchestrator = Orchestrator::new(&gateway, &store, &taxonomy, run_config);
            if let Some(sink) = trace_sink.as_ref() {
                orchestrator = orchestrator.with_trace(sink as &dyn TraceSink);
            }
            let outcome = orchestrator.run(samples, Some(cancel.as_ref())).await;

            // flush traces even when the run failed
            drop(orchestrator);
            drop(trace_sink);
            if let Some(worker) = trace_worker {
                worker.join()?;
            }
            let state = outcome?;

            let summary = state.summary();
            if let Some(out) = &out {
                if summary.phase == RunPhase::Finished {
                    write_results(out, state.results())?;
                    tracing::info!(path = %out.display(), "results written");
                } else {
                    tracing::warn!(
                        path = %out.display(),
                        "run not finished; results file not written (checkpoint holds progress)"
                    );
                }
            }

            let coverage = provider_coverage(state.results(), state.providers());
            let markdown = render_run_markdown(&summary, &coverage);
            emit(report.as_deref(), &markdown)?;
        }
        Commands::Conflicts {
            results,
            providers,
            out,
            markdown,
            max_entries,
        } => {
            let stored = load_results(&results)?;
            let providers = if providers.is_empty() {
                providers_in(&stored)
            } else {
                providers
            };
            let report = analyze(&stored, &providers);
            tracing::info!(
                results_hash = %hash_results(&stored),
                analyzed = report.analyzed,
                conflicts = report.conflicts,
                "conflict analysis complete"
            );
            if let Some(out) = out {
                write_json(&out, &report)?;
            }
            let coverage = provider_coverage(&stored, &providers);
            let md = render_conflict_markdown(&report, &coverage, max_entries);
            emit(markdown.as_deref(), &md)?;
        }
        Commands::Taxonomy { taxonomy, json } => {
            let taxonomy = load_taxonomy(taxonomy.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&taxonomy)?);
            } else {
                let mut out = format!("Taxonomy v{}\n\n", taxonomy.taxonomy_version);
                if let Some(reference) = &taxonomy.paper_reference {
                    out.push_str(&format!("Reference: {reference}\n\n"));
                }
                for entry in &taxonomy.categories {
                    out.push_str(&format!(
                        "{}. {} [{}]\n   {}\n",
                        entry.id, entry.name, entry.code, entry.description
                    ));
                    for example in &entry.examples {
                        out.push_str(&format!("   - {example}\n"));
                    }
                }
                emit(None, &out)?;
            }
        }
        Commands::Prompt {
            samples,
            index,
            id,
            template,
            taxonomy,
            list,
        } => {
            if list {
                for t in PROMPTS {
                    let marker = if t.slug == DEFAULT_PROMPT.slug { " (default)" } else { "" };
                    println!("{}{marker}", t.slug);
                }
                return Ok(());
            }
            let taxonomy = load_taxonomy(taxonomy.as_deref())?;
            let template = resolve_template(template.as_deref())?;
            let samples = JsonSampleLoader::new(&samples).load_samples(None)?;
            let sample = match &id {
                Some(id) => samples.iter().find(|s| &s.unified_id == id),
                None => samples.get(index),
            }
            .ok_or_else(|| match &id {
                Some(id) => format!("no sample with unified_id {id}"),
                None => format!("sample index {index} out of range ({} samples)", samples.len()),
            })?;
            emit(None, &template.render(sample, &taxonomy))?;
        }
        Commands::Probe { config, providers } => {
            let config = TriageConfig::load(&config)?;
            let mut gateway = config.build_gateway(Arc::new(TracingUsageSink))?;
            if !providers.is_empty() {
                gateway.retain(&providers)?;
            }
            let mut reachable = 0usize;
            for name in gateway.provider_names() {
                let (ok, status) = match gateway.probe(&name, PROBE_PROMPT).await {
                    Ok(resp) => (true, format!("ok: {:?}", resp.content.trim())),
                    Err(err) => match err.kind() {
                        CallErrorKind::QuotaExceeded => (true, "key valid, quota exceeded".to_string()),
                        CallErrorKind::RateLimited => (true, "key valid, rate limited".to_string()),
                        CallErrorKind::ModelLoading => (true, "reachable, model loading".to_string()),
                        CallErrorKind::ModelUnavailable => {
                            (false, format!("model not available: {err}"))
                        }
                        _ => (false, format!("failed: {err}")),
                    },
                };
                if ok {
                    reachable += 1;
                }
                println!("{name:<16} {status}");
            }
            println!("{reachable}/{} providers reachable", gateway.providers().len());
        }
    }

    Ok(())
}

fn load_taxonomy(path: Option<&Path>) -> Result<Taxonomy, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Taxonomy::load(path)?),
        None => Ok(Taxonomy::default()),
    }
}

fn resolve_template(slug: Option<&str>) -> Result<PromptTemplate, Box<dyn std::error::Error>> {
    match slug {
        None => Ok(DEFAULT_PROMPT),
        Some(slug) => prompt_by_slug(slug).ok_or_else(|| {
            let available = PROMPTS.iter().map(|t| t.slug).collect::<Vec<_>>().join(", ");
            format!("unknown prompt template '{slug}'; available: {available}").into()
        }),
    }
}

fn emit(path: Option<&Path>, text: &str) -> Result<(), io::Error> {
    match path {
        Some(path) => std::fs::write(path, text),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
            Ok(())
        }
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
