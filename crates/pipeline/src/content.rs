//! Request and result types for a generation run.
//!
//! A [`GenerationRequest`] names what to produce ([`ContentKind`]) and carries
//! the caller's [`GenerationContext`]. The context is opaque to the pipeline: it
//! is handed to the prompt builders verbatim. A successful run yields a
//! [`GenerationResult`] holding the parsed [`GeneratedUnit`]s.

use serde::{Deserialize, Serialize};

use crate::{ContextId, DetectionScore, PipelineRunId, TokenCount, UnitId};

// ---------------------------------------------------------------------------
// Content kinds
// ---------------------------------------------------------------------------

/// The kind of multi-message content a run produces.
///
/// The kind selects the prompt builder and the block delimiter the unit parser
/// splits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Onboarding emails sent right after sign-up.
    WelcomeSequence,
    /// Relationship-building emails for an existing list.
    NurtureSequence,
    /// Emails announcing and opening a launch.
    LaunchSequence,
    /// Emails driving toward a purchase decision.
    SalesSequence,
    /// A series of social posts.
    SocialCampaign,
}

impl ContentKind {
    /// All kinds, in declaration order.
    pub const ALL: [ContentKind; 5] = [
        ContentKind::WelcomeSequence,
        ContentKind::NurtureSequence,
        ContentKind::LaunchSequence,
        ContentKind::SalesSequence,
        ContentKind::SocialCampaign,
    ];

    /// Stable snake_case name used in storage and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::WelcomeSequence => "welcome_sequence",
            ContentKind::NurtureSequence => "nurture_sequence",
            ContentKind::LaunchSequence => "launch_sequence",
            ContentKind::SalesSequence => "sales_sequence",
            ContentKind::SocialCampaign => "social_campaign",
        }
    }

    /// The header word that starts each block in backend output
    /// (`EMAIL 1`, `POST 3`, ...).
    pub fn unit_label(self) -> &'static str {
        match self {
            ContentKind::SocialCampaign => "POST",
            _ => "EMAIL",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase().replace('-', "_");
        ContentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalised)
            .ok_or_else(|| format!("unknown content kind '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Business/offer/timeline context for a run.
///
/// Only `id` and `voice_samples` are interpreted by the pipeline; `attributes`
/// is passed through to prompt builders untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    /// Identity of this context; the per-context concurrency guard keys on it.
    pub id: ContextId,

    /// Samples of the author's own writing, fed to the critique pass.
    #[serde(default)]
    pub voice_samples: Vec<String>,

    /// Free-form context for prompt builders.
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// Immutable input to one `generate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// What to generate.
    pub kind: ContentKind,
    /// Context handed to the prompt builders.
    pub context: GenerationContext,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One structured output item, e.g. one email in a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedUnit {
    /// Fresh identifier assigned at parse time.
    pub id: UnitId,

    /// 1-based position within the sequence.
    pub sequence_position: u32,

    /// What this unit is meant to achieve. Empty when the block had no purpose line.
    pub purpose: String,

    /// Candidate subject lines (or hooks, for social posts).
    pub subject_variants: Vec<String>,

    /// Main text. Empty when the block had no recognisable body.
    pub body: String,

    /// Call to action, when one was labelled separately from the body.
    pub call_to_action: Option<String>,

    /// Days after the sequence start this unit should go out.
    pub schedule_offset_days: u32,

    /// Detection score assigned by the quality gate. Zero until scored.
    pub detection_score: DetectionScore,
}

/// The outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Run that produced this result.
    pub run_id: PipelineRunId,

    /// Parsed units, ordered by `sequence_position`.
    pub units: Vec<GeneratedUnit>,

    /// Tokens consumed by every pass that contributed, including passes
    /// restored from a checkpoint.
    pub total_tokens: TokenCount,

    /// Wall-clock duration of this invocation in milliseconds.
    pub elapsed_ms: u64,

    /// Mean detection score of `units`; `0.0` when there are none.
    pub mean_detection_score: f64,

    /// Whether the detection-refinement pass ran.
    pub refinement_applied: bool,

    /// First pass executed by this invocation when it resumed from a
    /// checkpoint; `None` for a fresh run.
    pub resumed_from: Option<crate::Pass>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_kind_parses_cli_spellings() {
        assert_eq!(
            "launch-sequence".parse::<ContentKind>().unwrap(),
            ContentKind::LaunchSequence
        );
        assert_eq!(
            " Social_Campaign ".parse::<ContentKind>().unwrap(),
            ContentKind::SocialCampaign
        );
        assert!("newsletter".parse::<ContentKind>().is_err());
    }

    #[test]
    fn content_kind_serde_matches_as_str() {
        for kind in ContentKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn social_kind_uses_post_label() {
        assert_eq!(ContentKind::SocialCampaign.unit_label(), "POST");
        assert_eq!(ContentKind::WelcomeSequence.unit_label(), "EMAIL");
    }

    #[test]
    fn context_defaults_optional_fields() {
        let ctx: GenerationContext = serde_json::from_str(r#"{"id":"offer-1"}"#).unwrap();
        assert!(ctx.voice_samples.is_empty());
        assert!(ctx.attributes.is_null());
    }
}
