//! Phrase-based heuristic for text that reads as machine-written.

use pipeline::{DetectionReport, DetectionScore, DetectionScorer};

/// Stock phrases that show up far more often in generated copy than in
/// copy written by people.
const STOCK_PHRASES: &[&str] = &[
    "delve",
    "in today's fast-paced",
    "ever-evolving",
    "game-changer",
    "unlock the power",
    "unleash",
    "elevate your",
    "seamless",
    "leverage",
    "embark on",
    "tapestry",
    "navigate the",
    "it's important to note",
    "in conclusion",
    "look no further",
    "whether you're a",
    "take it to the next level",
    "a testament to",
];

const PHRASE_WEIGHT: f64 = 1.5;
const DASH_WEIGHT: f64 = 1.0;
const UNIFORMITY_WEIGHT: f64 = 2.0;

/// [`DetectionScorer`] that counts stock phrases, em-dash density and how
/// uniform sentence lengths are.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhraseScorer;

impl DetectionScorer for PhraseScorer {
    fn score(&self, text: &str) -> DetectionReport {
        let lower = text.to_lowercase();
        let mut score = 0.0;
        let mut warnings = Vec::new();

        for phrase in STOCK_PHRASES {
            let hits = lower.matches(phrase).count();
            if hits > 0 {
                score += PHRASE_WEIGHT * hits as f64;
                warnings.push(format!("stock phrase '{phrase}'"));
            }
        }

        let words = text.split_whitespace().count().max(1);
        let dashes = text.matches('\u{2014}').count();
        if dashes * 100 / words >= 2 {
            score += DASH_WEIGHT * dashes as f64;
            warnings.push("heavy em-dash use".to_string());
        }

        if sentences_are_uniform(text) {
            score += UNIFORMITY_WEIGHT;
            warnings.push("sentence lengths are too even".to_string());
        }

        DetectionReport {
            score: DetectionScore::clamped(score),
            warnings,
        }
    }
}

/// True when there are at least five sentences and their word counts barely vary.
fn sentences_are_uniform(text: &str) -> bool {
    let lengths: Vec<f64> = text
        .split(['.', '!', '?'])
        .map(|s| s.split_whitespace().count())
        .filter(|&n| n > 0)
        .map(|n| n as f64)
        .collect();
    if lengths.len() < 5 {
        return false;
    }
    let mean = lengths.iter().sum::<f64>() / lengths.len() as f64;
    let variance = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / lengths.len() as f64;
    variance.sqrt() / mean < 0.2
}
