//! Pass sequencing and observable pipeline state.
//!
//! [`Pass`] enumerates the ordered stages of a run. [`PipelineState`] is the
//! snapshot an executor publishes to observers as it moves through them. The
//! transition methods on [`PipelineState`] enforce that progress never goes
//! backwards within one invocation.

use serde::{Deserialize, Serialize};

use crate::{GenerationError, GenerationResult};

/// One ordered stage of the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    /// First draft from the system + user prompts.
    Draft,
    /// Critique of the draft against the author's voice samples.
    Critique,
    /// Rewrite of the draft applying the critique; output is parsed into units.
    Rewrite,
    /// Conditional extra pass run when the detection gate fails.
    DetectionRefinement,
    /// Terminal marker; no backend call.
    Complete,
}

impl Pass {
    /// Progress value reported when this pass starts.
    pub fn progress_percent(self) -> u8 {
        match self {
            Pass::Draft => 10,
            Pass::Critique => 35,
            Pass::Rewrite => 55,
            Pass::DetectionRefinement => 75,
            Pass::Complete => 100,
        }
    }

    /// Stable snake_case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Pass::Draft => "draft",
            Pass::Critique => "critique",
            Pass::Rewrite => "rewrite",
            Pass::DetectionRefinement => "detection_refinement",
            Pass::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------

/// Coarse lifecycle position of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PipelinePhase {
    /// No invocation has started, or the executor has been reset.
    Idle,
    /// A pass is executing.
    Running {
        /// The pass in progress.
        pass: Pass,
    },
    /// The last invocation succeeded.
    Complete,
    /// The last invocation failed.
    Failed {
        /// Whether a checkpoint was left in place for a later resume.
        checkpoint_retained: bool,
    },
}

/// Snapshot of one executor's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// `true` while an invocation holds the executor's in-flight guard.
    pub is_generating: bool,

    /// Lifecycle position.
    pub phase: PipelinePhase,

    /// Last pass entered (or `Draft` before any pass has run).
    pub current_pass: Pass,

    /// Percentage complete; one of the fixed [`Pass::progress_percent`] values.
    pub progress_percent: u8,

    /// Populated once the invocation completes successfully.
    pub result: Option<GenerationResult>,

    /// Populated when the invocation fails.
    pub error: Option<GenerationError>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::idle()
    }
}

impl PipelineState {
    /// The state of an executor that has never run.
    pub fn idle() -> Self {
        Self {
            is_generating: false,
            phase: PipelinePhase::Idle,
            current_pass: Pass::Draft,
            progress_percent: 0,
            result: None,
            error: None,
        }
    }

    /// Resets to the start of a fresh invocation.
    pub fn begin(&mut self) {
        *self = Self {
            is_generating: true,
            ..Self::idle()
        };
    }

    /// Records that `pass` has started.
    ///
    /// Progress is raised to the pass's fixed value but never lowered.
    pub fn enter(&mut self, pass: Pass) {
        self.current_pass = pass;
        self.phase = PipelinePhase::Running { pass };
        self.progress_percent = self.progress_percent.max(pass.progress_percent());
    }

    /// Records successful completion.
    pub fn complete(&mut self, result: GenerationResult) {
        self.is_generating = false;
        self.current_pass = Pass::Complete;
        self.phase = PipelinePhase::Complete;
        self.progress_percent = Pass::Complete.progress_percent();
        self.result = Some(result);
        self.error = None;
    }

    /// Records a terminal failure. Progress stays where the failing pass left it.
    pub fn fail(&mut self, error: GenerationError) {
        self.is_generating = false;
        self.phase = PipelinePhase::Failed {
            checkpoint_retained: error.checkpoint_retained(),
        };
        self.result = None;
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_values_are_strictly_increasing_in_pass_order() {
        let passes = [
            Pass::Draft,
            Pass::Critique,
            Pass::Rewrite,
            Pass::DetectionRefinement,
            Pass::Complete,
        ];
        for pair in passes.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].progress_percent() < pair[1].progress_percent());
        }
    }

    #[test]
    fn enter_never_lowers_progress() {
        let mut state = PipelineState::idle();
        state.begin();
        state.enter(Pass::Rewrite);
        state.enter(Pass::Critique);
        assert_eq!(state.progress_percent, 55);
        assert_eq!(state.current_pass, Pass::Critique);
    }

    #[test]
    fn fail_records_retention_from_error() {
        let mut state = PipelineState::idle();
        state.begin();
        state.enter(Pass::Critique);
        state.fail(GenerationError::PipelineFailed {
            pass: Pass::Critique,
            cause: crate::PassFailure::Cancelled,
            checkpoint_retained: true,
        });
        assert!(!state.is_generating);
        assert_eq!(
            state.phase,
            PipelinePhase::Failed {
                checkpoint_retained: true
            }
        );
        assert_eq!(state.progress_percent, 35);
    }

    #[test]
    fn begin_clears_previous_outcome() {
        let mut state = PipelineState::idle();
        state.fail(GenerationError::UserCancelled);
        state.begin();
        assert!(state.is_generating);
        assert!(state.error.is_none());
        assert_eq!(state.progress_percent, 0);
    }
}
