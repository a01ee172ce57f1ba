//! Detection gate: decides whether the rewrite needs a refinement pass.
//!
//! The scoring heuristic is opaque (see [`DetectionScorer`]). The gate only
//! scores each unit, averages the scores, gathers the warnings and compares the
//! mean against a threshold.

use crate::{DetectionScore, DetectionScorer, GeneratedUnit};

/// Mean score above which a refinement pass runs.
pub const DEFAULT_DETECTION_THRESHOLD: f64 = 3.0;

/// Mean detection score of `units`. An empty slice yields `0.0`.
pub fn mean_detection_score(units: &[GeneratedUnit]) -> f64 {
    if units.is_empty() {
        return 0.0;
    }
    let total: f64 = units.iter().map(|u| u.detection_score.as_f64()).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = total / units.len() as f64;
    mean
}

/// What the gate concluded for one set of units.
#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    /// Mean of the unit scores.
    pub mean_score: f64,
    /// De-duplicated warnings across all units, in first-seen order.
    pub warnings: Vec<String>,
    /// Whether the mean exceeded the threshold.
    pub requires_refinement: bool,
}

/// Threshold-based refinement decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionGate {
    threshold: f64,
}

impl Default for DetectionGate {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DETECTION_THRESHOLD,
        }
    }
}

impl DetectionGate {
    /// A gate with the given threshold, clamped into the score range.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: DetectionScore::clamped(threshold).as_f64(),
        }
    }

    /// The threshold in use.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Scores every unit in place and decides on refinement.
    ///
    /// Units with an empty body are not sent to the scorer and keep a zero score.
    pub fn evaluate(&self, units: &mut [GeneratedUnit], scorer: &dyn DetectionScorer) -> GateVerdict {
        let mut warnings: Vec<String> = Vec::new();
        for unit in units.iter_mut() {
            if unit.body.trim().is_empty() {
                unit.detection_score = DetectionScore::zero();
                continue;
            }
            let report = scorer.score(&unit.body);
            unit.detection_score = report.score;
            for warning in report.warnings {
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }
        }

        let mean_score = mean_detection_score(units);
        GateVerdict {
            mean_score,
            warnings,
            requires_refinement: mean_score > self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DetectionReport, UnitId};

    struct FixedScorer {
        score: f64,
        warnings: Vec<&'static str>,
    }

    impl DetectionScorer for FixedScorer {
        fn score(&self, _text: &str) -> DetectionReport {
            DetectionReport {
                score: DetectionScore::clamped(self.score),
                warnings: self.warnings.iter().map(|w| (*w).to_string()).collect(),
            }
        }
    }

    fn unit(body: &str) -> GeneratedUnit {
        GeneratedUnit {
            id: UnitId::new_random(),
            sequence_position: 1,
            purpose: String::new(),
            subject_variants: Vec::new(),
            body: body.to_string(),
            call_to_action: None,
            schedule_offset_days: 0,
            detection_score: DetectionScore::zero(),
        }
    }

    #[test]
    fn empty_units_mean_is_zero_not_nan() {
        let mean = mean_detection_score(&[]);
        assert_eq!(mean, 0.0);
        assert!(!mean.is_nan());
    }

    #[test]
    fn mean_of_four_triggers_refinement() {
        let scorer = FixedScorer {
            score: 4.0,
            warnings: vec![],
        };
        let mut units = vec![unit("a"), unit("b")];
        let verdict = DetectionGate::default().evaluate(&mut units, &scorer);
        assert_eq!(verdict.mean_score, 4.0);
        assert!(verdict.requires_refinement);
    }

    #[test]
    fn mean_of_two_passes() {
        let scorer = FixedScorer {
            score: 2.0,
            warnings: vec![],
        };
        let mut units = vec![unit("a")];
        assert!(!DetectionGate::default().evaluate(&mut units, &scorer).requires_refinement);
    }

    #[test]
    fn mean_equal_to_threshold_passes() {
        let scorer = FixedScorer {
            score: 3.0,
            warnings: vec![],
        };
        let mut units = vec![unit("a")];
        assert!(!DetectionGate::default().evaluate(&mut units, &scorer).requires_refinement);
    }

    #[test]
    fn empty_bodies_are_not_scored_and_dilute_the_mean() {
        let scorer = FixedScorer {
            score: 8.0,
            warnings: vec!["tell"],
        };
        let mut units = vec![unit("text"), unit("   ")];
        let verdict = DetectionGate::default().evaluate(&mut units, &scorer);
        assert_eq!(units[1].detection_score, DetectionScore::zero());
        assert_eq!(verdict.mean_score, 4.0);
    }

    #[test]
    fn warnings_are_deduplicated_in_order() {
        let scorer = FixedScorer {
            score: 1.0,
            warnings: vec!["em dashes", "stock phrase"],
        };
        let mut units = vec![unit("a"), unit("b")];
        let verdict = DetectionGate::default().evaluate(&mut units, &scorer);
        assert_eq!(verdict.warnings, vec!["em dashes", "stock phrase"]);
    }
}
