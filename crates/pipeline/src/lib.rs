//! Core domain for InkWorks multi-pass content generation.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, policy rule and port trait used by the generation pipeline.
//! Infrastructure crates implement the traits defined here; they never add
//! domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it,
//! and the `nodes` crate sequences the calls.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`CallerId`, `ContextId`, `PipelineRunId`, ...) |
//! | [`types`] | Value types (`TokenCount`, `DetectionScore`, `Timestamp`, `DayKey`) |
//! | [`content`] | Request/result model (`ContentKind`, `GenerationRequest`, `GeneratedUnit`, ...) |
//! | [`state`] | `Pass` ordering and the observable `PipelineState` |
//! | [`checkpoint`] | Persisted `Checkpoint` record and its reuse rule |
//! | [`rate_limit`] | Cooldown and daily-cap policy |
//! | [`parser`] | Backend text → `GeneratedUnit`s |
//! | [`detection`] | Detection gate decision policy |
//! | [`ports`] | Traits for the backend, prompts, consent, credentials, scoring, clock, storage |
//! | [`errors`] | `GenerationError` taxonomy and `RetryPolicy` |

pub mod checkpoint;
pub mod content;
pub mod detection;
pub mod errors;
pub mod identifiers;
pub mod parser;
pub mod ports;
pub mod rate_limit;
pub mod state;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use checkpoint::{Checkpoint, CheckpointValidity, DEFAULT_CHECKPOINT_TTL};
pub use content::{
    ContentKind, GeneratedUnit, GenerationContext, GenerationRequest, GenerationResult,
};
pub use detection::{mean_detection_score, DetectionGate, GateVerdict, DEFAULT_DETECTION_THRESHOLD};
pub use errors::{BackendError, GenerationError, ParseError, PassFailure, RetryPolicy, StoreError};
pub use identifiers::{CallerId, ContextId, PipelineRunId, UnitId};
pub use parser::parse_units;
pub use ports::{
    Clock, Completion, CompletionRequest, ConsentPort, ConsentPrompt, Credential,
    CredentialResolver, DetectionReport, DetectionScorer, GenerationBackend, KeyValueStore,
    PromptBuilder, PromptBuilders, SystemClock,
};
pub use rate_limit::{RateLimitCounters, RateLimitDecision, RateLimitDenial, RateLimitPolicy};
pub use state::{Pass, PipelinePhase, PipelineState};
pub use types::{DayKey, DetectionScore, Timestamp, TokenCount};
