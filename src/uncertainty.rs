//! Disagreement score between the detector and the few-shot classifier.

use std::collections::BTreeSet;

use crate::prediction::Prediction;

/// Score when neither model predicted anything.
pub const BOTH_EMPTY_SCORE: f32 = 1.0;
/// Score when exactly one model predicted something.
pub const ONE_EMPTY_SCORE: f32 = 0.8;

const LABEL_WEIGHT: f32 = 0.6;
const CONFIDENCE_WEIGHT: f32 = 0.3;
const COUNT_WEIGHT: f32 = 0.1;
const COUNT_STEP: f32 = 0.1;
const COUNT_CAP: f32 = 0.2;

/// Uncertainty in `[0, 1]`; higher means the two models agree less.
pub fn score(a: &[Prediction], b: &[Prediction]) -> f32 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return BOTH_EMPTY_SCORE,
        (true, false) | (false, true) => return ONE_EMPTY_SCORE,
        _ => {}
    }
    let labels_a: BTreeSet<&str> = a.iter().map(|p| p.label.as_str()).collect();
    let labels_b: BTreeSet<&str> = b.iter().map(|p| p.label.as_str()).collect();
    let intersection = labels_a.intersection(&labels_b).count() as f32;
    let union = labels_a.union(&labels_b).count() as f32;
    let label_disagreement = 1.0 - intersection / union;

    let total = (a.len() + b.len()) as f32;
    let mean_confidence = a
        .iter()
        .chain(b.iter())
        .map(|p| p.confidence)
        .sum::<f32>()
        / total;
    let confidence_uncertainty = 1.0 - mean_confidence;

    let count_gap = (a.len() as f32 - b.len() as f32).abs();
    let count_disagreement = (COUNT_STEP * count_gap).min(COUNT_CAP);

    let combined = LABEL_WEIGHT * label_disagreement
        + CONFIDENCE_WEIGHT * confidence_uncertainty
        + COUNT_WEIGHT * count_disagreement;
    if combined.is_finite() {
        combined.clamp(0.0, 1.0)
    } else {
        BOTH_EMPTY_SCORE
    }
}
