//! Error and retry-policy types for the generation pipeline.
//!
//! [`GenerationError`] is what `generate` returns. Per-component failures
//! ([`BackendError`], [`ParseError`], [`StoreError`]) are standalone types; when
//! one of them stops a pass it is wrapped in [`PassFailure`] inside
//! [`GenerationError::PipelineFailed`], which also records whether a checkpoint
//! survived for the next attempt.
//!
//! [`RetryPolicy`] is a cross-cutting concern: backend errors report whether a
//! manual retry is worth suggesting and after what delay.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ContentKind, Pass};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// The pipeline never retries on its own; this is surfaced to the caller so it
/// can decide whether to re-invoke `generate` (which resumes from the last
/// checkpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt, typically taken from a
        /// `retry-after` response header. `None` means no hint was given.
        after: Option<Duration>,
    },
    /// Retrying without changing something (credential, config) will fail again.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Component errors
// ---------------------------------------------------------------------------

/// Failure of a single call to the generation backend.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum BackendError {
    /// The adapter had no credential to authenticate with.
    #[error("backend credential missing")]
    MissingCredential,

    /// The request never produced an HTTP response (DNS, TLS, connection reset...).
    #[error("backend transport failure: {message}")]
    Transport {
        /// Description of the transport error.
        message: String,
    },

    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error body or reason phrase, with secrets scrubbed.
        message: String,
        /// Parsed `retry-after` header, when present.
        retry_after: Option<Duration>,
    },

    /// The backend answered 2xx but the body could not be understood.
    #[error("malformed backend response: {message}")]
    MalformedResponse {
        /// What was wrong with the body.
        message: String,
    },
}

impl BackendError {
    /// Whether re-invoking the pipeline is likely to get past this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            BackendError::Transport { .. } => RetryPolicy::Retryable { after: None },
            BackendError::Status {
                status,
                retry_after,
                ..
            } if *status == 429 || *status >= 500 => RetryPolicy::Retryable {
                after: *retry_after,
            },
            BackendError::MissingCredential
            | BackendError::Status { .. }
            | BackendError::MalformedResponse { .. } => RetryPolicy::NonRetryable,
        }
    }
}

/// The unit parser could not extract a single unit.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ParseError {
    /// The backend returned nothing but whitespace.
    #[error("backend output for {kind} was empty")]
    EmptyInput {
        /// Kind being parsed.
        kind: ContentKind,
    },

    /// Text was present but no block carried any recognisable field.
    #[error("no {kind} units could be extracted from backend output")]
    NoUnits {
        /// Kind being parsed.
        kind: ContentKind,
    },
}

/// Failure of the durable key/value store behind checkpoints and counters.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum StoreError {
    /// Reading or writing the underlying medium failed.
    #[error("storage I/O failed for '{key}': {message}")]
    Io {
        /// Key being accessed.
        key: String,
        /// Underlying error message.
        message: String,
    },

    /// A value could not be serialised for writing.
    #[error("could not serialise value for '{key}': {message}")]
    Serialization {
        /// Key being written.
        key: String,
        /// Underlying error message.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Why a pass stopped.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PassFailure {
    /// The backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The pass output could not be parsed into units.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The caller cancelled while the pass was waiting on the backend.
    #[error("cancelled by caller")]
    Cancelled,

    /// The backend call exceeded the configured per-call timeout.
    #[error("backend call timed out after {after:?}")]
    TimedOut {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Persisting a checkpoint or counters failed mid-run.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Everything `generate` can fail with.
///
/// Rate-limit, credential, concurrency and consent errors are raised before any
/// pass runs and leave no partial state behind. Failures during a pass are
/// always [`GenerationError::PipelineFailed`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum GenerationError {
    /// No credential could be resolved for the caller.
    #[error("no backend credential configured for this caller")]
    CredentialMissing,

    /// Another invocation is already running for this context.
    #[error("a generation is already in progress for this context")]
    AlreadyInProgress,

    /// The previous invocation was too recent.
    #[error("rate limit cooldown active: {seconds_remaining}s remaining")]
    RateLimitCooldown {
        /// Whole seconds until the cooldown expires (rounded up).
        seconds_remaining: u64,
    },

    /// The daily hard cap has been reached.
    #[error("daily generation limit reached ({daily_count} today)")]
    RateLimitDailyCap {
        /// Successful runs recorded today.
        daily_count: u32,
    },

    /// The caller declined a consent prompt.
    #[error("cancelled by user")]
    UserCancelled,

    /// A pass failed; the run stopped there.
    #[error("pipeline failed during {pass}: {cause}")]
    PipelineFailed {
        /// The pass that failed.
        pass: Pass,
        /// What went wrong.
        #[source]
        cause: PassFailure,
        /// Whether a checkpoint is in place so a retry resumes instead of restarting.
        checkpoint_retained: bool,
    },

    /// The durable store failed before any pass ran.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The executor is missing something it needs (e.g. a prompt builder for the kind).
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },
}

impl GenerationError {
    /// `true` when a failed run left a checkpoint that the next call can resume from.
    pub fn checkpoint_retained(&self) -> bool {
        matches!(
            self,
            GenerationError::PipelineFailed {
                checkpoint_retained: true,
                ..
            }
        )
    }

    /// Text suitable for showing to the person who asked for the generation.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::CredentialMissing => {
                "No API key is configured. Add one and try again.".to_string()
            }
            GenerationError::AlreadyInProgress => {
                "A generation is already running for this context. Wait for it to finish."
                    .to_string()
            }
            GenerationError::RateLimitCooldown { seconds_remaining } => format!(
                "Please wait {seconds_remaining} more second{} before generating again.",
                if *seconds_remaining == 1 { "" } else { "s" }
            ),
            GenerationError::RateLimitDailyCap { .. } => {
                "Today's generation limit has been reached. Generation is blocked until tomorrow."
                    .to_string()
            }
            GenerationError::UserCancelled => "Generation cancelled.".to_string(),
            GenerationError::PipelineFailed {
                pass,
                cause,
                checkpoint_retained,
            } => {
                let mut msg = format!("Generation failed during the {pass} step: {cause}.");
                if *checkpoint_retained {
                    msg.push_str(" Your progress was saved; retrying will resume where it stopped.");
                } else {
                    msg.push_str(" Retrying will start from the beginning.");
                }
                if let PassFailure::Backend(backend) = cause {
                    match backend.retry_policy() {
                        RetryPolicy::Retryable { after: Some(after) } => {
                            msg.push_str(&format!(" Try again in {}s.", after.as_secs().max(1)));
                        }
                        RetryPolicy::Retryable { after: None } => {}
                        RetryPolicy::NonRetryable => {
                            msg.push_str(" Check your API key and settings before retrying.");
                        }
                    }
                }
                msg
            }
            GenerationError::Storage(err) => format!("Could not access saved state: {err}."),
            GenerationError::Configuration { message } => {
                format!("The generator is misconfigured: {message}.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        let throttled = BackendError::Status {
            status: 429,
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(
            throttled.retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(7))
            }
        );

        let overloaded = BackendError::Status {
            status: 529,
            message: "overloaded".into(),
            retry_after: None,
        };
        assert!(matches!(
            overloaded.retry_policy(),
            RetryPolicy::Retryable { after: None }
        ));
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let unauthorised = BackendError::Status {
            status: 401,
            message: "bad key".into(),
            retry_after: None,
        };
        assert_eq!(unauthorised.retry_policy(), RetryPolicy::NonRetryable);
        assert_eq!(
            BackendError::MissingCredential.retry_policy(),
            RetryPolicy::NonRetryable
        );
    }

    #[test]
    fn cooldown_message_surfaces_seconds() {
        let msg = GenerationError::RateLimitCooldown {
            seconds_remaining: 5,
        }
        .user_message();
        assert!(msg.contains("5 more seconds"));
    }

    #[test]
    fn daily_cap_message_mentions_tomorrow() {
        let msg = GenerationError::RateLimitDailyCap { daily_count: 100 }.user_message();
        assert!(msg.contains("until tomorrow"));
    }

    #[test]
    fn retained_checkpoint_message_promises_resume() {
        let err = GenerationError::PipelineFailed {
            pass: Pass::Critique,
            cause: PassFailure::Backend(BackendError::Transport {
                message: "connection reset".into(),
            }),
            checkpoint_retained: true,
        };
        assert!(err.checkpoint_retained());
        assert!(err.user_message().contains("progress was saved"));
    }

    #[test]
    fn only_pipeline_failures_retain_checkpoints() {
        assert!(!GenerationError::UserCancelled.checkpoint_retained());
        assert!(!GenerationError::PipelineFailed {
            pass: Pass::Draft,
            cause: PassFailure::Cancelled,
            checkpoint_retained: false,
        }
        .checkpoint_retained());
    }
}
