//! InkWorks CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: load `.inkworks/config.toml` (or `--config`) and
//!    validate it. An invalid config never starts a pipeline.
//! 2. **Wire observability**: configure `tracing-subscriber` with a JSON or
//!    pretty layer and, when `telemetry.otlp_endpoint` is set, an
//!    OpenTelemetry OTLP exporter. All spans and events from every crate in
//!    the workspace flow through it.
//! 3. **Construct infrastructure**: the file (or in-memory) store, the
//!    Anthropic backend, and the per-caller rate limiter and checkpoint store.
//! 4. **Dispatch**: `generate`, `status` or `reset-checkpoint`.

mod config;
mod consent;
mod credentials;
mod prompts;
mod scoring;
mod telemetry;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llm::AnthropicBackend;
use nodes::{CheckpointStore, ExecutorDeps, PipelineExecutor, RateLimiter};
use pipeline::{
    CallerId, CheckpointValidity, Clock, ContentKind, GenerationContext, GenerationError,
    GenerationRequest, KeyValueStore, PassFailure, PipelinePhase, PipelineState, RetryPolicy,
    SystemClock,
};
use storage::{FileStore, MemoryStore};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::consent::TerminalConsent;
use crate::credentials::EnvCredentials;
use crate::scoring::PhraseScorer;

#[derive(Debug, Parser)]
#[command(name = "inkworks", version, about = "Multi-pass marketing copy generation")]
struct Cli {
    /// Config file (default: .inkworks/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity that owns rate limits and checkpoints
    #[arg(long, global = true, default_value = "default")]
    caller: String,

    /// Keep counters and checkpoints in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a content sequence
    Generate {
        /// welcome-sequence, nurture-sequence, launch-sequence, sales-sequence or social-campaign
        #[arg(long)]
        kind: ContentKind,

        /// JSON file holding the generation context
        #[arg(long)]
        context: PathBuf,

        /// Write the result here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Approve usage warnings and resume offers without asking
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Show today's usage and any saved checkpoint
    Status,
    /// Discard the saved checkpoint for a content kind
    ResetCheckpoint {
        #[arg(long)]
        kind: ContentKind,
    },
}

/// Per-caller services shared by every command.
struct Services {
    caller: CallerId,
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<RateLimiter>,
    checkpoints: Arc<CheckpointStore>,
}

impl Services {
    async fn build(cli: &Cli, config: &Config) -> Result<Self> {
        let caller = CallerId::new(cli.caller.as_str()).context("--caller must not be blank")?;
        let store: Arc<dyn KeyValueStore> = if cli.ephemeral {
            Arc::new(MemoryStore::new())
        } else {
            let dir = config.data_dir();
            let store = FileStore::open(&dir)
                .await
                .with_context(|| format!("Failed to open data directory {}", dir.display()))?;
            Arc::new(store)
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        Ok(Self {
            rate_limiter: Arc::new(RateLimiter::new(
                Arc::clone(&store),
                caller.clone(),
                config.rate_limit_policy(),
            )),
            checkpoints: Arc::new(CheckpointStore::new(
                store,
                caller.clone(),
                Arc::clone(&clock),
                config.checkpoint_ttl(),
            )),
            caller,
            clock,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;
    let telemetry = telemetry::init(&config.telemetry)?;

    let outcome = dispatch(&cli, &config).await;

    telemetry.shutdown();
    outcome
}

async fn dispatch(cli: &Cli, config: &Config) -> Result<ExitCode> {
    let services = Services::build(cli, config).await?;
    match &cli.command {
        Command::Generate {
            kind,
            context,
            output,
            yes,
        } => generate(&services, config, *kind, context, output.as_deref(), *yes).await,
        Command::Status => status(&services, config).await,
        Command::ResetCheckpoint { kind } => {
            services.checkpoints.clear(*kind).await?;
            println!("Cleared {kind} checkpoint for {}", services.caller);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn generate(
    services: &Services,
    config: &Config,
    kind: ContentKind,
    context_path: &Path,
    output: Option<&Path>,
    yes: bool,
) -> Result<ExitCode> {
    let raw = tokio::fs::read_to_string(context_path)
        .await
        .with_context(|| format!("Failed to read context file {}", context_path.display()))?;
    let context: GenerationContext = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid context file {}", context_path.display()))?;

    let backend =
        AnthropicBackend::new(config.anthropic()).context("Failed to build HTTP client")?;
    let deps = ExecutorDeps {
        backend: Arc::new(backend),
        credentials: Arc::new(EnvCredentials::new(config.backend.api_key_env.as_str())),
        consent: Arc::new(TerminalConsent::new(yes)),
        prompts: prompts::registry(),
        scorer: Arc::new(PhraseScorer),
        clock: Arc::clone(&services.clock),
        rate_limiter: Arc::clone(&services.rate_limiter),
        checkpoints: Arc::clone(&services.checkpoints),
    };
    let executor = PipelineExecutor::new(
        services.caller.clone(),
        context.id.clone(),
        deps,
        config.pipeline(),
    );

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling");
                cancel.cancel();
            }
        }
    });
    let progress = tokio::spawn(render_progress(executor.subscribe()));

    let request = GenerationRequest { kind, context };
    let outcome = executor.generate(&request, &cancel).await;
    interrupt.abort();
    // Closes the progress channel. Preflight failures never publish a state,
    // so the renderer only stops once the sender is gone.
    drop(executor);
    let _ = progress.await;

    match outcome {
        Ok(result) => {
            let json = serde_json::to_string_pretty(&result).context("Failed to encode result")?;
            match output {
                Some(path) => {
                    tokio::fs::write(path, json)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(path = %path.display(), units = result.units.len(), "result written");
                    eprintln!("Wrote {} units to {}", result.units.len(), path.display());
                }
                None => println!("{json}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            if let Some(hint) = retry_hint(&e) {
                eprintln!("{hint}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Extra advice when the backend said when to come back.
fn retry_hint(error: &GenerationError) -> Option<String> {
    let GenerationError::PipelineFailed {
        cause: PassFailure::Backend(backend),
        ..
    } = error
    else {
        return None;
    };
    match backend.retry_policy() {
        RetryPolicy::Retryable { after: Some(after) } => Some(format!(
            "The service asked to wait {}s before retrying.",
            after.as_secs()
        )),
        RetryPolicy::Retryable { after: None } => {
            Some("This looks temporary; try again shortly.".to_string())
        }
        RetryPolicy::NonRetryable => None,
    }
}

async fn render_progress(mut rx: watch::Receiver<PipelineState>) {
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        match state.phase {
            PipelinePhase::Running { pass } => {
                eprintln!("[{:>3}%] {pass}", state.progress_percent);
            }
            PipelinePhase::Complete => {
                eprintln!("[100%] done");
                break;
            }
            PipelinePhase::Failed { .. } => break,
            PipelinePhase::Idle => {}
        }
    }
}

async fn status(services: &Services, config: &Config) -> Result<ExitCode> {
    let now = services.clock.now();
    let policy = services.rate_limiter.policy();
    let counters = services.rate_limiter.snapshot(now).await?;

    println!("Caller: {}", services.caller);
    println!(
        "Today ({}): {} of {} generations",
        counters.day_key, counters.daily_count, policy.hard_cap
    );
    if counters.daily_count >= policy.soft_cap {
        println!("  Each further run today asks for confirmation.");
    }
    if let Some(last) = counters.last_invocation_at {
        println!("Last success: {last}");
    }

    match services.checkpoints.peek().await? {
        None => println!("Checkpoint: none"),
        Some(cp) => {
            let state = match cp.validity(cp.content_kind, now, config.checkpoint_ttl()) {
                CheckpointValidity::Stale { .. } => "expired, will be discarded",
                _ => "resumable",
            };
            println!(
                "Checkpoint: {} saved {} ({state}; resumes at {})",
                cp.content_kind,
                cp.saved_at,
                cp.resume_pass()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}
