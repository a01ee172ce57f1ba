//! Port traits: everything the pipeline needs from the outside world.
//!
//! Infrastructure crates implement these; the pipeline and the orchestration
//! layer only ever see the traits. All are object-safe so they can be injected
//! as `Arc<dyn Trait>`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    BackendError, CallerId, ContentKind, DetectionScore, GenerationContext, Pass, StoreError,
    Timestamp, TokenCount,
};

// ---------------------------------------------------------------------------
// Generation backend
// ---------------------------------------------------------------------------

/// One completion request. Exactly one is sent per pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Pass this request serves; lets adapters log and tune per pass.
    pub pass: Pass,
    /// System prompt.
    pub system_prompt: String,
    /// User prompt (generation, critique, rewrite or refinement prompt).
    pub user_prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Text produced by a completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Tokens billed for the call (prompt + completion).
    pub tokens_used: TokenCount,
}

/// External text-generation service.
///
/// Implementations make exactly one network call per invocation and never retry.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Sends `request` authenticated with `credential`.
    async fn complete(
        &self,
        credential: &Credential,
        request: &CompletionRequest,
    ) -> Result<Completion, BackendError>;
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// A secret used to authenticate against the backend. `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a secret, returning `None` if it is blank.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let s = secret.into();
        if s.trim().is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    /// Returns the raw secret for placing in a request header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Looks up the backend credential for a caller.
pub trait CredentialResolver: Send + Sync {
    /// Returns the caller's credential, or `None` if none is configured.
    fn resolve_credential(&self, caller: &CallerId) -> Option<Credential>;
}

// ---------------------------------------------------------------------------
// Consent
// ---------------------------------------------------------------------------

/// A question put to the caller before the pipeline proceeds.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsentPrompt {
    /// Today's count has reached the soft cap.
    DailyUsageWarning {
        /// Successful runs so far today.
        daily_count: u32,
        /// Hard cap for the day.
        hard_cap: u32,
        /// Whether the count is high enough for the stronger warning.
        escalated: bool,
    },
    /// A valid checkpoint exists for this kind.
    ResumeCheckpoint {
        /// Kind the checkpoint belongs to.
        kind: ContentKind,
        /// Pass the run would resume at.
        resume_at: Pass,
        /// When the checkpoint was saved.
        saved_at: Timestamp,
    },
}

impl ConsentPrompt {
    /// Human-readable wording for the prompt.
    pub fn message(&self) -> String {
        match self {
            ConsentPrompt::DailyUsageWarning {
                daily_count,
                hard_cap,
                escalated: false,
            } => format!(
                "You have generated content {daily_count} times today (limit {hard_cap}). Continue?"
            ),
            ConsentPrompt::DailyUsageWarning {
                daily_count,
                hard_cap,
                escalated: true,
            } => format!(
                "Heavy usage: {daily_count} generations today, {} left before generation is \
                 blocked until tomorrow. Each run costs API credits. Are you sure you want to continue?",
                hard_cap.saturating_sub(*daily_count)
            ),
            ConsentPrompt::ResumeCheckpoint {
                kind,
                resume_at,
                saved_at,
            } => format!(
                "An unfinished {kind} generation was saved at {saved_at}. Resume from the {resume_at} step?"
            ),
        }
    }
}

/// Asks the caller to confirm something.
///
/// Resolves immediately in tests; in interactive use it waits on the user.
#[async_trait]
pub trait ConsentPort: Send + Sync {
    /// Returns `true` if the caller agrees.
    async fn confirm(&self, prompt: &ConsentPrompt) -> bool;
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Builds the prompts for one content kind. Pure; no side effects.
pub trait PromptBuilder: Send + Sync {
    /// System prompt used by every pass.
    fn build_system_prompt(&self, context: &GenerationContext) -> String;

    /// User prompt for the draft pass.
    fn build_user_prompt(&self, context: &GenerationContext) -> String;

    /// User prompt for the critique pass.
    fn build_critique_prompt(&self, draft: &str, voice_samples: &[String]) -> String;

    /// User prompt for the rewrite pass.
    fn build_rewrite_prompt(&self, draft: &str, critique: &str, context: &GenerationContext)
        -> String;

    /// User prompt for the detection-refinement pass.
    fn build_refinement_prompt(&self, rewrite: &str, mean_score: f64, warnings: &[String])
        -> String;
}

/// Prompt builders keyed by content kind.
#[derive(Clone, Default)]
pub struct PromptBuilders {
    builders: HashMap<ContentKind, Arc<dyn PromptBuilder>>,
}

impl PromptBuilders {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `builder` for `kind`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, kind: ContentKind, builder: Arc<dyn PromptBuilder>) -> Self {
        self.builders.insert(kind, builder);
        self
    }

    /// Registers `builder` for every kind.
    #[must_use]
    pub fn with_all(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        for kind in ContentKind::ALL {
            self.builders.insert(kind, Arc::clone(&builder));
        }
        self
    }

    /// The builder for `kind`, if one is registered.
    pub fn get(&self, kind: ContentKind) -> Option<&Arc<dyn PromptBuilder>> {
        self.builders.get(&kind)
    }
}

impl std::fmt::Debug for PromptBuilders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptBuilders")
            .field("kinds", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Detection heuristic
// ---------------------------------------------------------------------------

/// Output of the detection heuristic for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionReport {
    /// How machine-generated the text looks; higher is worse.
    pub score: DetectionScore,
    /// Specific tells the heuristic found.
    pub warnings: Vec<String>,
}

/// The opaque text-scoring heuristic.
pub trait DetectionScorer: Send + Sync {
    /// Scores one text.
    fn score(&self, text: &str) -> DetectionReport;
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> Timestamp;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Durable string store used for checkpoints and rate-limit counters.
///
/// Values are JSON documents. Writes must be durable when `put` returns.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads `key`, returning `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
