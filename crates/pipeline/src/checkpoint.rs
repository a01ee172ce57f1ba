//! The persisted checkpoint record and its reuse rule.
//!
//! A [`Checkpoint`] is written after the draft pass and rewritten after the
//! critique pass. It may be reused by a later invocation only when it was saved
//! for the same [`ContentKind`] and is no older than the TTL; anything else is
//! discarded.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ContentKind, Pass, Timestamp, TokenCount};

/// Default time a checkpoint stays eligible for resume.
pub const DEFAULT_CHECKPOINT_TTL: Duration = Duration::from_secs(60 * 60);

/// Snapshot of completed, externally-costly passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Kind the checkpointed passes were generated for.
    pub content_kind: ContentKind,

    /// Output of the draft pass.
    pub draft_text: String,

    /// Tokens the draft pass consumed.
    pub draft_tokens: TokenCount,

    /// Output of the critique pass, once it has run.
    #[serde(default)]
    pub critique_text: Option<String>,

    /// Tokens the critique pass consumed, once it has run.
    #[serde(default)]
    pub critique_tokens: Option<TokenCount>,

    /// When this record was last written.
    pub saved_at: Timestamp,
}

/// Outcome of checking a stored checkpoint against a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointValidity {
    /// Same kind and within the TTL.
    Valid,
    /// Saved for a different kind.
    KindMismatch {
        /// Kind recorded in the checkpoint.
        stored: ContentKind,
    },
    /// Older than the TTL.
    Stale {
        /// Age of the record in whole seconds.
        age_secs: i64,
    },
}

impl Checkpoint {
    /// Record written right after the draft pass succeeds.
    pub fn after_draft(
        content_kind: ContentKind,
        draft_text: impl Into<String>,
        draft_tokens: TokenCount,
        saved_at: Timestamp,
    ) -> Self {
        Self {
            content_kind,
            draft_text: draft_text.into(),
            draft_tokens,
            critique_text: None,
            critique_tokens: None,
            saved_at,
        }
    }

    /// Extends this record with the critique pass output.
    #[must_use]
    pub fn with_critique(
        self,
        critique_text: impl Into<String>,
        critique_tokens: TokenCount,
        saved_at: Timestamp,
    ) -> Self {
        Self {
            critique_text: Some(critique_text.into()),
            critique_tokens: Some(critique_tokens),
            saved_at,
            ..self
        }
    }

    /// The first pass this checkpoint does not already cover.
    pub fn resume_pass(&self) -> Pass {
        if self.critique_text.is_some() {
            Pass::Rewrite
        } else {
            Pass::Critique
        }
    }

    /// Tokens spent on the passes this checkpoint covers.
    pub fn tokens_spent(&self) -> TokenCount {
        self.draft_tokens + self.critique_tokens.unwrap_or_default()
    }

    /// Whether this checkpoint may seed a run of `kind` at `now`.
    ///
    /// A record saved exactly `ttl` ago is still valid. A `saved_at` in the
    /// future (clock skew) counts as fresh.
    pub fn validity(&self, kind: ContentKind, now: Timestamp, ttl: Duration) -> CheckpointValidity {
        if self.content_kind != kind {
            return CheckpointValidity::KindMismatch {
                stored: self.content_kind,
            };
        }
        let age = now.since(self.saved_at);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        if age.num_milliseconds() > ttl_ms {
            CheckpointValidity::Stale {
                age_secs: age.num_seconds(),
            }
        } else {
            CheckpointValidity::Valid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap())
    }

    fn draft_only() -> Checkpoint {
        Checkpoint::after_draft(ContentKind::WelcomeSequence, "draft", TokenCount::new(120), t0())
    }

    #[test]
    fn draft_only_resumes_at_critique() {
        assert_eq!(draft_only().resume_pass(), Pass::Critique);
    }

    #[test]
    fn critique_resumes_at_rewrite_and_sums_tokens() {
        let cp = draft_only().with_critique("notes", TokenCount::new(30), t0());
        assert_eq!(cp.resume_pass(), Pass::Rewrite);
        assert_eq!(cp.tokens_spent(), TokenCount::new(150));
        assert_eq!(cp.draft_text, "draft");
    }

    #[test]
    fn valid_up_to_and_including_ttl() {
        let cp = draft_only();
        let at_ttl = t0().plus(chrono::Duration::hours(1));
        assert_eq!(
            cp.validity(ContentKind::WelcomeSequence, at_ttl, DEFAULT_CHECKPOINT_TTL),
            CheckpointValidity::Valid
        );
    }

    #[test]
    fn two_hours_old_is_stale() {
        let cp = draft_only();
        let later = t0().plus(chrono::Duration::hours(2));
        assert_eq!(
            cp.validity(ContentKind::WelcomeSequence, later, DEFAULT_CHECKPOINT_TTL),
            CheckpointValidity::Stale { age_secs: 7200 }
        );
    }

    #[test]
    fn other_kind_is_a_mismatch_even_when_fresh() {
        let cp = draft_only();
        assert_eq!(
            cp.validity(ContentKind::SalesSequence, t0(), DEFAULT_CHECKPOINT_TTL),
            CheckpointValidity::KindMismatch {
                stored: ContentKind::WelcomeSequence
            }
        );
    }

    #[test]
    fn deserialises_record_without_critique_fields() {
        let json = serde_json::json!({
            "content_kind": "welcome_sequence",
            "draft_text": "d",
            "draft_tokens": 5,
            "saved_at": "2026-05-04T09:00:00Z"
        });
        let cp: Checkpoint = serde_json::from_value(json).unwrap();
        assert!(cp.critique_text.is_none());
        assert_eq!(cp.resume_pass(), Pass::Critique);
    }
}
