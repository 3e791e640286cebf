//! Scoring metrics for binary presence/background classifiers.
//!
//! All scorers accept optional sample weights and share a greater-is-better
//! orientation so cross-validation can select a lambda by simple argmax
//! (log-loss is negated by [`Scorer::score`]).

use crate::features::ConfigError;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Floor applied to probabilities before taking logs in the log-loss.
const PROB_FLOOR: f64 = 1e-15;

/// Which metric cross-validation uses to score held-out folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scorer {
    RocAuc,
    LogLoss,
    Accuracy,
}

impl Scorer {
    /// Scores held-out predictions. Greater is always better: the log-loss is
    /// returned negated so that all three metrics can be maximized.
    pub fn score(
        &self,
        labels: ArrayView1<f64>,
        probabilities: ArrayView1<f64>,
        weights: Option<ArrayView1<f64>>,
    ) -> f64 {
        match self {
            Scorer::RocAuc => roc_auc(labels, probabilities, weights),
            Scorer::LogLoss => -log_loss(labels, probabilities, weights),
            Scorer::Accuracy => accuracy(labels, probabilities, weights),
        }
    }
}

impl FromStr for Scorer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "roc_auc" | "auc" => Ok(Scorer::RocAuc),
            "log_loss" | "neg_log_loss" => Ok(Scorer::LogLoss),
            "accuracy" => Ok(Scorer::Accuracy),
            other => Err(ConfigError::UnknownScorer(other.to_string())),
        }
    }
}

impl fmt::Display for Scorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scorer::RocAuc => "roc_auc",
            Scorer::LogLoss => "log_loss",
            Scorer::Accuracy => "accuracy",
        })
    }
}

/// Area under the ROC curve via the Mann-Whitney rank statistic.
///
/// Tied scores are resolved by average rank, which is equivalent to counting
/// each tied positive/negative pair as half a win. With sample weights, each
/// pair contributes the product of its two weights. Returns 0.5 when either
/// class is absent or carries zero total weight.
pub fn roc_auc(
    labels: ArrayView1<f64>,
    scores: ArrayView1<f64>,
    weights: Option<ArrayView1<f64>>,
) -> f64 {
    let n = labels.len();
    assert_eq!(n, scores.len());
    let weight_at = |i: usize| weights.map_or(1.0, |w| w[i]);

    let mut w_pos = 0.0;
    let mut w_neg = 0.0;
    for i in 0..n {
        if labels[i] > 0.5 {
            w_pos += weight_at(i);
        } else {
            w_neg += weight_at(i);
        }
    }
    if w_pos == 0.0 || w_neg == 0.0 {
        return 0.5;
    }

    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| scores[i].partial_cmp(&scores[j]).unwrap_or(std::cmp::Ordering::Equal));

    // Walk tie groups in ascending score order: a positive outranks all
    // negatives seen strictly below its group and half of those tied with it.
    let mut hits = 0.0;
    let mut seen_neg = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && (scores[idx[j]] - scores[idx[i]]).abs() < 1e-10 {
            j += 1;
        }
        let mut group_pos = 0.0;
        let mut group_neg = 0.0;
        for &k in &idx[i..j] {
            if labels[k] > 0.5 {
                group_pos += weight_at(k);
            } else {
                group_neg += weight_at(k);
            }
        }
        hits += group_pos * (seen_neg + 0.5 * group_neg);
        seen_neg += group_neg;
        i = j;
    }
    hits / (w_pos * w_neg)
}

/// Weighted mean binary cross-entropy. Probabilities are floored away from
/// 0 and 1 so a confident miss stays finite.
pub fn log_loss(
    labels: ArrayView1<f64>,
    probabilities: ArrayView1<f64>,
    weights: Option<ArrayView1<f64>>,
) -> f64 {
    let n = labels.len();
    assert_eq!(n, probabilities.len());
    let weight_at = |i: usize| weights.map_or(1.0, |w| w[i]);

    let mut loss = 0.0;
    let mut total = 0.0;
    for i in 0..n {
        let w = weight_at(i);
        let p = probabilities[i].clamp(PROB_FLOOR, 1.0 - PROB_FLOOR);
        loss += w * if labels[i] > 0.5 { -p.ln() } else { -(1.0 - p).ln() };
        total += w;
    }
    loss / total
}

/// Weighted fraction of correct classifications at the 0.5 threshold.
pub fn accuracy(
    labels: ArrayView1<f64>,
    probabilities: ArrayView1<f64>,
    weights: Option<ArrayView1<f64>>,
) -> f64 {
    let n = labels.len();
    assert_eq!(n, probabilities.len());
    let weight_at = |i: usize| weights.map_or(1.0, |w| w[i]);

    let mut correct = 0.0;
    let mut total = 0.0;
    for i in 0..n {
        let w = weight_at(i);
        if (labels[i] > 0.5) == (probabilities[i] >= 0.5) {
            correct += w;
        }
        total += w;
    }
    correct / total
}
