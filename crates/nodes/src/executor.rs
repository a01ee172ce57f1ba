//! Pipeline executor: drives one generation through its passes.
//!
//! ```text
//! Idle ─► Draft ─► Critique ─► Rewrite ─► [DetectionRefinement] ─► Complete
//!           │          │           │                │
//!           └──────────┴───────────┴────────────────┴──────► Failed
//! ```
//!
//! Preflight (credential, in-flight guard, prompt builder, rate limit) runs
//! before any state changes. A checkpoint is written after Draft and after
//! Critique so that a failed run can be resumed by calling `generate` again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pipeline::{
    mean_detection_score, parse_units, CallerId, Checkpoint, Clock, Completion, CompletionRequest,
    ConsentPort, ConsentPrompt, ContentKind, ContextId, Credential, CredentialResolver,
    DetectionGate, DetectionScorer, GeneratedUnit, GenerationBackend, GenerationError,
    GenerationRequest, GenerationResult, Pass, PassFailure, PipelineRunId, PipelineState,
    PromptBuilder, PromptBuilders, RateLimitDecision, TokenCount, DEFAULT_DETECTION_THRESHOLD,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::gateway::{LlmGateway, DEFAULT_CALL_TIMEOUT};
use crate::{CheckpointStore, RateLimiter};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sampling temperature used for each pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassTemperatures {
    /// First pass; favours variety.
    pub draft: f64,
    /// Editorial pass; kept low so the critique stays focused.
    pub critique: f64,
    /// Applies the critique to the draft.
    pub rewrite: f64,
    /// The optional detection-refinement pass.
    pub refinement: f64,
}

impl Default for PassTemperatures {
    fn default() -> Self {
        Self {
            draft: 0.8,
            critique: 0.3,
            rewrite: 0.7,
            refinement: 0.6,
        }
    }
}

impl PassTemperatures {
    /// Temperature for `pass`. `Complete` never reaches the backend and maps to 0.
    pub fn for_pass(&self, pass: Pass) -> f64 {
        match pass {
            Pass::Draft => self.draft,
            Pass::Critique => self.critique,
            Pass::Rewrite => self.rewrite,
            Pass::DetectionRefinement => self.refinement,
            Pass::Complete => 0.0,
        }
    }
}

/// Tunables for one executor.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Upper bound on each backend call.
    pub call_timeout: Duration,
    /// Mean detection score above which one refinement pass runs.
    pub detection_threshold: f64,
    /// Sampling temperature per pass.
    pub temperatures: PassTemperatures,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            temperatures: PassTemperatures::default(),
        }
    }
}

/// Collaborators injected into an executor.
///
/// `rate_limiter` and `checkpoints` are per caller; executors for different
/// contexts of the same caller must share the same instances.
pub struct ExecutorDeps {
    /// Where every pass is sent, through the [`LlmGateway`].
    pub backend: Arc<dyn GenerationBackend>,
    /// Resolves the caller's backend key before anything else runs.
    pub credentials: Arc<dyn CredentialResolver>,
    /// Asked about heavy-usage warnings and resume offers.
    pub consent: Arc<dyn ConsentPort>,
    /// One builder per content kind.
    pub prompts: PromptBuilders,
    /// Scores parsed units for the detection gate.
    pub scorer: Arc<dyn DetectionScorer>,
    /// Time source for rate limiting and checkpoint timestamps.
    pub clock: Arc<dyn Clock>,
    /// The caller's usage counters.
    pub rate_limiter: Arc<RateLimiter>,
    /// The caller's resumable checkpoint slot.
    pub checkpoints: Arc<CheckpointStore>,
}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

/// Holds the executor's in-flight flag for the lifetime of one invocation.
///
/// Dropping it releases the flag. If the invocation was abandoned mid-pass
/// (the `generate` future was dropped) the published state is moved to
/// `Failed` so observers do not see a run that never ends.
struct InFlight<'a> {
    flag: &'a AtomicBool,
    checkpoint_held: &'a AtomicBool,
    state: &'a watch::Sender<PipelineState>,
}

impl<'a> InFlight<'a> {
    fn acquire(executor: &'a PipelineExecutor) -> Option<Self> {
        executor
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: &executor.in_flight,
                checkpoint_held: &executor.checkpoint_held,
                state: &executor.state,
            })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if !state.is_generating {
                return false;
            }
            state.fail(GenerationError::PipelineFailed {
                pass: state.current_pass,
                cause: PassFailure::Cancelled,
                checkpoint_retained: self.checkpoint_held.load(Ordering::Acquire),
            });
            true
        });
        self.flag.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs the multi-pass pipeline for one (caller, context) pair.
///
/// At most one `generate` call may be active at a time; a second concurrent
/// call fails immediately with [`GenerationError::AlreadyInProgress`].
pub struct PipelineExecutor {
    caller: CallerId,
    context: ContextId,
    gateway: LlmGateway,
    credentials: Arc<dyn CredentialResolver>,
    consent: Arc<dyn ConsentPort>,
    prompts: PromptBuilders,
    scorer: Arc<dyn DetectionScorer>,
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<RateLimiter>,
    checkpoints: Arc<CheckpointStore>,
    gate: DetectionGate,
    temperatures: PassTemperatures,
    in_flight: AtomicBool,
    /// Whether the current invocation has a checkpoint in the store.
    checkpoint_held: AtomicBool,
    state: watch::Sender<PipelineState>,
}

/// Values threaded through the passes of one invocation.
struct Run<'a> {
    kind: ContentKind,
    request: &'a GenerationRequest,
    credential: &'a Credential,
    cancel: &'a CancellationToken,
    system_prompt: String,
    tokens: TokenCount,
}

impl PipelineExecutor {
    /// Executor serving `context` on behalf of `caller`. Starts idle.
    pub fn new(
        caller: CallerId,
        context: ContextId,
        deps: ExecutorDeps,
        config: PipelineConfig,
    ) -> Self {
        Self {
            caller,
            context,
            gateway: LlmGateway::new(deps.backend, config.call_timeout),
            credentials: deps.credentials,
            consent: deps.consent,
            prompts: deps.prompts,
            scorer: deps.scorer,
            clock: deps.clock,
            rate_limiter: deps.rate_limiter,
            checkpoints: deps.checkpoints,
            gate: DetectionGate::new(config.detection_threshold),
            temperatures: config.temperatures,
            in_flight: AtomicBool::new(false),
            checkpoint_held: AtomicBool::new(false),
            state: watch::Sender::new(PipelineState::idle()),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Receives every state change from now on.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Runs the pipeline for `request`.
    ///
    /// Cancelling `cancel` stops the run at the current backend call with
    /// [`PassFailure::Cancelled`]; any checkpoint already written is kept.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, GenerationError> {
        let run_id = PipelineRunId::new_random();
        let span = info_span!(
            "generate",
            %run_id,
            caller = %self.caller,
            context = %request.context.id,
            kind = %request.kind,
        );
        self.generate_inner(run_id, request, cancel)
            .instrument(span)
            .await
    }

    async fn generate_inner(
        &self,
        run_id: PipelineRunId,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, GenerationError> {
        let credential = self
            .credentials
            .resolve_credential(&self.caller)
            .ok_or_else(|| {
                warn!("no credential configured");
                GenerationError::CredentialMissing
            })?;

        let _guard = InFlight::acquire(self).ok_or_else(|| {
            warn!("rejected: generation already in progress");
            GenerationError::AlreadyInProgress
        })?;

        if request.context.id != self.context {
            return Err(GenerationError::Configuration {
                message: format!(
                    "executor serves context '{}' but the request is for '{}'",
                    self.context, request.context.id
                ),
            });
        }

        let prompts = Arc::clone(self.prompts.get(request.kind).ok_or_else(|| {
            GenerationError::Configuration {
                message: format!("no prompt builder registered for {}", request.kind),
            }
        })?);

        self.admit().await?;

        let started = Instant::now();
        self.state.send_modify(PipelineState::begin);
        info!("generation started");

        let outcome = self
            .execute(run_id, request, prompts.as_ref(), &credential, cancel, started)
            .await;

        match outcome {
            Ok(result) => {
                info!(
                    units = result.units.len(),
                    total_tokens = result.total_tokens.as_u64(),
                    mean_detection_score = result.mean_detection_score,
                    refinement_applied = result.refinement_applied,
                    elapsed_ms = result.elapsed_ms,
                    "generation complete"
                );
                self.state.send_modify(|s| s.complete(result.clone()));
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, checkpoint_retained = e.checkpoint_retained(), "generation failed");
                self.state.send_modify(|s| s.fail(e.clone()));
                Err(e)
            }
        }
    }

    /// Rate-limit check, with a consent prompt when the soft cap is reached.
    async fn admit(&self) -> Result<(), GenerationError> {
        match self.rate_limiter.check_allowed(self.clock.now()).await? {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Denied(denial) => {
                warn!(?denial, "rate limit denied generation");
                Err(denial.into())
            }
            RateLimitDecision::RequiresConsent {
                daily_count,
                escalated,
            } => {
                let prompt = ConsentPrompt::DailyUsageWarning {
                    daily_count,
                    hard_cap: self.rate_limiter.policy().hard_cap,
                    escalated,
                };
                if self.consent.confirm(&prompt).await {
                    info!(daily_count, escalated, "heavy-usage warning accepted");
                    Ok(())
                } else {
                    info!(daily_count, "heavy-usage warning declined");
                    Err(GenerationError::UserCancelled)
                }
            }
        }
    }

    /// Loads the checkpoint for `kind` and asks whether to resume from it.
    ///
    /// A declined offer clears the checkpoint.
    async fn resume_point(&self, kind: ContentKind) -> Result<Option<Checkpoint>, GenerationError> {
        let Some(checkpoint) = self.checkpoints.load(kind).await? else {
            return Ok(None);
        };
        self.checkpoint_held.store(true, Ordering::Release);

        let prompt = ConsentPrompt::ResumeCheckpoint {
            kind,
            resume_at: checkpoint.resume_pass(),
            saved_at: checkpoint.saved_at,
        };
        if self.consent.confirm(&prompt).await {
            info!(resume_at = %checkpoint.resume_pass(), "resuming from checkpoint");
            Ok(Some(checkpoint))
        } else {
            info!("resume declined; starting over");
            self.checkpoints.clear(kind).await?;
            self.checkpoint_held.store(false, Ordering::Release);
            Ok(None)
        }
    }

    async fn execute(
        &self,
        run_id: PipelineRunId,
        request: &GenerationRequest,
        prompts: &dyn PromptBuilder,
        credential: &Credential,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<GenerationResult, GenerationError> {
        let kind = request.kind;
        let context = &request.context;
        self.checkpoint_held.store(false, Ordering::Release);
        let resumed = self.resume_point(kind).await?;
        let resumed_from = resumed.as_ref().map(Checkpoint::resume_pass);

        let mut run = Run {
            kind,
            request,
            credential,
            cancel,
            system_prompt: prompts.build_system_prompt(context),
            tokens: TokenCount::default(),
        };

        let mut checkpoint = match resumed {
            Some(checkpoint) => {
                run.tokens += checkpoint.tokens_spent();
                checkpoint
            }
            None => {
                let draft = self
                    .run_pass(&mut run, Pass::Draft, prompts.build_user_prompt(context))
                    .await?;
                let checkpoint = Checkpoint::after_draft(
                    kind,
                    draft.text,
                    draft.tokens_used,
                    self.clock.now(),
                );
                self.save_checkpoint(Pass::Draft, &checkpoint).await?;
                checkpoint
            }
        };

        let critique = match checkpoint.critique_text.clone() {
            Some(critique) => critique,
            None => {
                let user_prompt =
                    prompts.build_critique_prompt(&checkpoint.draft_text, &context.voice_samples);
                let critique = self.run_pass(&mut run, Pass::Critique, user_prompt).await?;
                checkpoint = checkpoint.with_critique(
                    critique.text.clone(),
                    critique.tokens_used,
                    self.clock.now(),
                );
                self.save_checkpoint(Pass::Critique, &checkpoint).await?;
                critique.text
            }
        };

        let user_prompt = prompts.build_rewrite_prompt(&checkpoint.draft_text, &critique, context);
        let rewrite = self.run_pass(&mut run, Pass::Rewrite, user_prompt).await?;
        let mut units = self.parse(&run, Pass::Rewrite, &rewrite.text)?;

        let verdict = self.gate.evaluate(&mut units, self.scorer.as_ref());
        debug!(
            mean_detection_score = verdict.mean_score,
            threshold = self.gate.threshold(),
            warnings = verdict.warnings.len(),
            "detection gate evaluated"
        );

        let refinement_applied = verdict.requires_refinement;
        if refinement_applied {
            info!(
                mean_detection_score = verdict.mean_score,
                threshold = self.gate.threshold(),
                "detection score above threshold; refining"
            );
            let user_prompt = prompts.build_refinement_prompt(
                &rewrite.text,
                verdict.mean_score,
                &verdict.warnings,
            );
            let refined = self
                .run_pass(&mut run, Pass::DetectionRefinement, user_prompt)
                .await?;
            units = self.parse(&run, Pass::DetectionRefinement, &refined.text)?;
            self.gate.evaluate(&mut units, self.scorer.as_ref());
        }

        self.finish(kind).await;

        Ok(GenerationResult {
            run_id,
            mean_detection_score: mean_detection_score(&units),
            units,
            total_tokens: run.tokens,
            elapsed_ms: started.elapsed().as_millis() as u64,
            refinement_applied,
            resumed_from,
        })
    }

    /// Enters `pass` and makes its single backend call.
    async fn run_pass(
        &self,
        run: &mut Run<'_>,
        pass: Pass,
        user_prompt: String,
    ) -> Result<Completion, GenerationError> {
        self.state.send_modify(|s| s.enter(pass));
        info!(%pass, progress_percent = pass.progress_percent(), "pass started");

        let request = CompletionRequest {
            pass,
            system_prompt: run.system_prompt.clone(),
            user_prompt,
            temperature: self.temperatures.for_pass(pass),
        };
        let completion = self
            .gateway
            .call(run.credential, &request, run.cancel)
            .await
            .map_err(|cause| self.pass_failed(pass, cause))?;

        run.tokens += completion.tokens_used;
        debug!(%pass, tokens_used = completion.tokens_used.as_u64(), "pass finished");
        Ok(completion)
    }

    async fn save_checkpoint(
        &self,
        pass: Pass,
        checkpoint: &Checkpoint,
    ) -> Result<(), GenerationError> {
        // Set before the write: a save abandoned mid-flight may still land.
        let held_before = self.checkpoint_held.swap(true, Ordering::AcqRel);
        if let Err(e) = self.checkpoints.save(checkpoint).await {
            self.checkpoint_held.store(held_before, Ordering::Release);
            return Err(self.pass_failed(pass, PassFailure::Storage(e)));
        }
        Ok(())
    }

    fn parse(&self, run: &Run<'_>, pass: Pass, raw: &str) -> Result<Vec<GeneratedUnit>, GenerationError> {
        let units =
            parse_units(raw, run.kind).map_err(|e| self.pass_failed(pass, e.into()))?;
        debug!(%pass, units = units.len(), context = %run.request.context.id, "output parsed");
        Ok(units)
    }

    fn pass_failed(&self, pass: Pass, cause: PassFailure) -> GenerationError {
        let checkpoint_retained = self.checkpoint_held.load(Ordering::Acquire);
        warn!(%pass, error = %cause, checkpoint_retained, "pass failed");
        GenerationError::PipelineFailed {
            pass,
            cause,
            checkpoint_retained,
        }
    }

    /// Post-success bookkeeping. The result is already final; failures here
    /// are logged and do not fail the run.
    async fn finish(&self, kind: ContentKind) {
        match self.checkpoints.clear(kind).await {
            Ok(()) => self.checkpoint_held.store(false, Ordering::Release),
            Err(e) => warn!(error = %e, "could not clear checkpoint after success"),
        }
        if let Err(e) = self.rate_limiter.record_success(self.clock.now()).await {
            error!(error = %e, "could not record successful generation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        EchoPrompts, FixedScorer, ManualClock, ScriptedBackend, ScriptedConsent,
        StaticCredentials, TWO_EMAILS,
    };
    use async_trait::async_trait;
    use pipeline::{GenerationContext, KeyValueStore, PipelinePhase, RateLimitPolicy};
    use storage::MemoryStore;

    fn executor(backend: Arc<ScriptedBackend>, prompts: PromptBuilders) -> PipelineExecutor {
        executor_with_consent(backend, prompts, Arc::new(ScriptedConsent::always(true))).0
    }

    fn executor_with_consent(
        backend: Arc<ScriptedBackend>,
        prompts: PromptBuilders,
        consent: Arc<dyn ConsentPort>,
    ) -> (PipelineExecutor, Arc<CheckpointStore>) {
        let caller = CallerId::new("alice").unwrap();
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let checkpoints = Arc::new(CheckpointStore::new(
            Arc::clone(&kv),
            caller.clone(),
            Arc::clone(&clock),
            pipeline::DEFAULT_CHECKPOINT_TTL,
        ));
        let deps = ExecutorDeps {
            backend,
            credentials: Arc::new(StaticCredentials::key("sk-test")),
            consent,
            prompts,
            scorer: Arc::new(FixedScorer::new(1.0)),
            clock: Arc::clone(&clock),
            rate_limiter: Arc::new(RateLimiter::new(
                Arc::clone(&kv),
                caller.clone(),
                RateLimitPolicy::default(),
            )),
            checkpoints: Arc::clone(&checkpoints),
        };
        let executor = PipelineExecutor::new(
            caller,
            ContextId::new("ctx-1").unwrap(),
            deps,
            PipelineConfig::default(),
        );
        (executor, checkpoints)
    }

    /// Approves everything except resume offers, which it never answers.
    struct StallOnResume;

    #[async_trait]
    impl ConsentPort for StallOnResume {
        async fn confirm(&self, prompt: &ConsentPrompt) -> bool {
            if matches!(prompt, ConsentPrompt::ResumeCheckpoint { .. }) {
                std::future::pending::<()>().await;
            }
            true
        }
    }

    fn request(context: &str) -> GenerationRequest {
        GenerationRequest {
            kind: ContentKind::WelcomeSequence,
            context: GenerationContext {
                id: ContextId::new(context).unwrap(),
                voice_samples: vec![],
                attributes: serde_json::Value::Null,
            },
        }
    }

    #[test]
    fn temperatures_map_to_passes() {
        let t = PassTemperatures::default();
        assert_eq!(t.for_pass(Pass::Draft), 0.8);
        assert_eq!(t.for_pass(Pass::Critique), 0.3);
        assert_eq!(t.for_pass(Pass::Rewrite), 0.7);
        assert_eq!(t.for_pass(Pass::DetectionRefinement), 0.6);
    }

    #[tokio::test]
    async fn runs_three_passes_with_pass_temperatures() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .reply("draft")
                .reply("critique")
                .reply(TWO_EMAILS),
        );
        let exec = executor(backend.clone(), PromptBuilders::new().with_all(Arc::new(EchoPrompts)));

        let result = exec
            .generate(&request("ctx-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.units.len(), 2);
        let temps: Vec<f64> = backend.calls().iter().map(|c| c.temperature).collect();
        assert_eq!(temps, vec![0.8, 0.3, 0.7]);
        assert_eq!(exec.state().progress_percent, 100);
        assert!(!exec.state().is_generating);
    }

    #[tokio::test]
    async fn missing_prompt_builder_is_a_configuration_error() {
        let backend = Arc::new(ScriptedBackend::new());
        let exec = executor(backend.clone(), PromptBuilders::new());

        let err = exec
            .generate(&request("ctx-1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Configuration { .. }));
        assert!(backend.calls().is_empty());
        assert_eq!(exec.state(), PipelineState::idle());
    }

    #[tokio::test]
    async fn request_for_another_context_is_rejected() {
        let backend = Arc::new(ScriptedBackend::new());
        let exec = executor(backend.clone(), PromptBuilders::new().with_all(Arc::new(EchoPrompts)));

        let err = exec
            .generate(&request("ctx-2"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Configuration { .. }));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_during_resume_offer_reports_retained_checkpoint() {
        let backend = Arc::new(ScriptedBackend::new());
        let (exec, checkpoints) = executor_with_consent(
            backend.clone(),
            PromptBuilders::new().with_all(Arc::new(EchoPrompts)),
            Arc::new(StallOnResume),
        );
        let saved = Checkpoint::after_draft(
            ContentKind::WelcomeSequence,
            "cached draft",
            TokenCount::new(10),
            ManualClock::default().now(),
        );
        checkpoints.save(&saved).await.unwrap();

        let request = request("ctx-1");
        let cancel = CancellationToken::new();
        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), exec.generate(&request, &cancel)).await;

        assert!(abandoned.is_err());
        assert!(backend.calls().is_empty());
        let state = exec.state();
        assert!(!state.is_generating);
        assert_eq!(
            state.phase,
            PipelinePhase::Failed {
                checkpoint_retained: true
            }
        );
        assert_eq!(checkpoints.peek().await.unwrap(), Some(saved));
    }
}
