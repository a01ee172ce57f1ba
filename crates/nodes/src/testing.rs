//! Deterministic doubles for the port traits.
//!
//! Used by this crate's unit tests and by the scenario tests under `tests/`.
//! Nothing here touches the network, the filesystem or the wall clock.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pipeline::{
    BackendError, CallerId, Clock, Completion, CompletionRequest, ConsentPort, ConsentPrompt,
    Credential, CredentialResolver, DetectionReport, DetectionScore, DetectionScorer,
    GenerationBackend, GenerationContext, Pass, PromptBuilder, Timestamp, TokenCount,
};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// A [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl Default for ManualClock {
    /// Starts at 2026-03-02T12:00:00Z.
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 3, 2, 12, 0, 0)
            .single()
            .map(Timestamp::from_utc)
            .unwrap_or_else(Timestamp::now);
        Self::at(start)
    }
}

impl ManualClock {
    /// A clock frozen at `now`.
    pub fn at(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock by `delta` (which may be negative).
    pub fn advance(&self, delta: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now = now.plus(delta);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.lock().map(|t| *t).unwrap_or_else(|p| *p.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// One scripted backend response.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Succeed with this text and token count.
    Text(String, TokenCount),
    /// Fail with this error.
    Fail(BackendError),
    /// Never answer. Used to exercise cancellation, timeouts and the in-flight guard.
    Hang,
}

/// A [`GenerationBackend`] that replays a fixed script and records every request.
///
/// Once the script is exhausted, further calls fail with a malformed-response error.
#[derive(Debug)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<CompletionRequest>>,
    call_count: watch::Sender<usize>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            call_count: watch::Sender::new(0),
        }
    }
}

impl ScriptedBackend {
    /// A backend with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, reply: Reply) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
        self
    }

    /// Appends a successful reply costing 100 tokens.
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Reply::Text(text.into(), TokenCount::new(100)))
    }

    /// Appends a successful reply with an explicit token count.
    pub fn reply_with_tokens(self, text: impl Into<String>, tokens: u64) -> Self {
        self.push(Reply::Text(text.into(), TokenCount::new(tokens)))
    }

    /// Appends a failing reply.
    pub fn fail(self, error: BackendError) -> Self {
        self.push(Reply::Fail(error))
    }

    /// Appends a reply that never arrives.
    pub fn hang(self) -> Self {
        self.push(Reply::Hang)
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// The pass of every request received so far.
    pub fn passes(&self) -> Vec<Pass> {
        self.calls().into_iter().map(|c| c.pass).collect()
    }

    /// Resolves once at least `n` requests have been received.
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.call_count.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn complete(
        &self,
        _credential: &Credential,
        request: &CompletionRequest,
    ) -> Result<Completion, BackendError> {
        // Taken before yielding so a call cancelled at the yield point still
        // consumes its reply.
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        self.call_count.send_modify(|n| *n += 1);
        tokio::task::yield_now().await;

        match next {
            Some(Reply::Text(text, tokens_used)) => Ok(Completion { text, tokens_used }),
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(BackendError::MalformedResponse {
                message: "script exhausted".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Consent
// ---------------------------------------------------------------------------

/// A [`ConsentPort`] that answers from a queue and records what it was asked.
#[derive(Debug)]
pub struct ScriptedConsent {
    answers: Mutex<VecDeque<bool>>,
    fallback: bool,
    prompts: Mutex<Vec<ConsentPrompt>>,
}

impl ScriptedConsent {
    /// Gives the same answer to every prompt.
    pub fn always(answer: bool) -> Self {
        Self::answers([], answer)
    }

    /// Answers from `answers` in order, then with `fallback`.
    pub fn answers(answers: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            fallback,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt shown so far.
    pub fn prompts(&self) -> Vec<ConsentPrompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConsentPort for ScriptedConsent {
    async fn confirm(&self, prompt: &ConsentPrompt) -> bool {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut a| a.pop_front())
            .unwrap_or(self.fallback)
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// A [`DetectionScorer`] returning queued scores, then repeating the last one.
#[derive(Debug)]
pub struct FixedScorer {
    queued: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    warnings: Vec<String>,
}

impl FixedScorer {
    /// Scores every text `score`.
    pub fn new(score: f64) -> Self {
        Self::sequence([score])
    }

    /// Scores texts with `scores` in order, repeating the final value.
    pub fn sequence(scores: impl IntoIterator<Item = f64>) -> Self {
        let queued: VecDeque<f64> = scores.into_iter().collect();
        let last = queued.back().copied().unwrap_or(0.0);
        Self {
            queued: Mutex::new(queued),
            last: Mutex::new(last),
            warnings: Vec::new(),
        }
    }

    /// Attaches `warnings` to every report.
    pub fn with_warnings(mut self, warnings: &[&str]) -> Self {
        self.warnings = warnings.iter().map(|w| w.to_string()).collect();
        self
    }
}

impl DetectionScorer for FixedScorer {
    fn score(&self, _text: &str) -> DetectionReport {
        let score = match self.queued.lock().ok().and_then(|mut q| q.pop_front()) {
            Some(score) => {
                if let Ok(mut last) = self.last.lock() {
                    *last = score;
                }
                score
            }
            None => self.last.lock().map(|l| *l).unwrap_or(0.0),
        };
        DetectionReport {
            score: DetectionScore::clamped(score),
            warnings: self.warnings.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Prompts and credentials
// ---------------------------------------------------------------------------

/// A [`PromptBuilder`] whose prompts name their inputs, so tests can assert on
/// what each pass was given.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoPrompts;

impl PromptBuilder for EchoPrompts {
    fn build_system_prompt(&self, context: &GenerationContext) -> String {
        format!("system:{}", context.id)
    }

    fn build_user_prompt(&self, context: &GenerationContext) -> String {
        format!("draft:{}", context.id)
    }

    fn build_critique_prompt(&self, draft: &str, voice_samples: &[String]) -> String {
        format!("critique:{draft}|voice:{}", voice_samples.len())
    }

    fn build_rewrite_prompt(
        &self,
        draft: &str,
        critique: &str,
        _context: &GenerationContext,
    ) -> String {
        format!("rewrite:{draft}|{critique}")
    }

    fn build_refinement_prompt(&self, rewrite: &str, mean_score: f64, warnings: &[String]) -> String {
        format!("refine:{mean_score:.1}:{}|{rewrite}", warnings.join(","))
    }
}

/// A [`CredentialResolver`] that hands every caller the same key, or none.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Option<Credential>);

impl StaticCredentials {
    /// Resolves every caller to `key`.
    pub fn key(key: &str) -> Self {
        Self(Credential::new(key))
    }

    /// Resolves nobody.
    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve_credential(&self, _caller: &CallerId) -> Option<Credential> {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Backend output that parses into two email units.
pub const TWO_EMAILS: &str = "\
EMAIL 1
Purpose: Welcome
Send Day: 0
Subject: Welcome aboard
Body:
Thanks for joining us.
CTA: Reply and say hello

EMAIL 2
Purpose: Follow up
Send Day: 3
Subject: Still there?
Body:
Checking in after a few days.
";

/// Backend output that parses into one refined email unit.
pub const REFINED_EMAIL: &str = "\
EMAIL 1
Purpose: Welcome
Send Day: 0
Subject: Hey, welcome
Body:
Glad you're here. Hit reply anytime.
";
