//! # Sample Weighting and Regularization
//!
//! Pure functions that turn a derived feature matrix and its presence (1) /
//! background (0) labels into the inputs of the penalized fit: per-sample
//! weights, per-feature relative penalties, and the descending lambda path.
//!
//! The penalty computation follows the Maxent conventions: a feature-class
//! base value interpolated against the presence count from published tables,
//! scaled by the presence-row spread of each feature column, with floors that
//! keep near-degenerate hinge and threshold features from going unpenalized.

use crate::features::{FeatureLabel, FeatureType};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// Relative weight of a background sample versus a presence sample.
const BACKGROUND_WEIGHT: f64 = 100.0;

/// Default length of the lambda path.
pub const DEFAULT_N_LAMBDAS: usize = 200;

/// Interpolation tables mapping presence count to a base penalty, one per
/// feature class. Linear, quadratic and product features share a single table
/// chosen by the richest of the three classes present in the feature set.
const LINEAR_TABLE: (&[f64], &[f64]) = (&[0.0, 10.0, 30.0, 100.0], &[1.0, 1.0, 0.2, 0.05]);
const QUADRATIC_TABLE: (&[f64], &[f64]) = (
    &[0.0, 10.0, 17.0, 30.0, 100.0],
    &[1.3, 0.8, 0.5, 0.25, 0.05],
);
const PRODUCT_TABLE: (&[f64], &[f64]) = (
    &[0.0, 10.0, 17.0, 30.0, 100.0],
    &[2.6, 1.6, 0.9, 0.55, 0.05],
);
const HINGE_TABLE: (&[f64], &[f64]) = (&[0.0, 1.0], &[0.5, 0.5]);
const THRESHOLD_TABLE: (&[f64], &[f64]) = (&[0.0, 100.0], &[2.0, 1.0]);
const CATEGORICAL_TABLE: (&[f64], &[f64]) = (&[0.0, 10.0, 17.0], &[0.65, 0.5, 0.25]);

/// Errors raised while computing penalties or the lambda path.
#[derive(Error, Debug)]
pub enum RegularizeError {
    #[error("labels and feature matrix disagree on sample count ({labels} vs {rows})")]
    ShapeMismatch { labels: usize, rows: usize },

    #[error("feature labels and feature matrix disagree on feature count ({labels} vs {cols})")]
    LabelCountMismatch { labels: usize, cols: usize },

    #[error("weights and labels disagree on sample count ({weights} vs {labels})")]
    WeightCountMismatch { weights: usize, labels: usize },

    #[error("no presence samples (label 1); regularization requires at least one presence row")]
    NoPresence,

    #[error("every per-feature penalty is zero, which would degenerate the lambda path")]
    DegeneratePenalties,

    #[error("the lambda path must contain at least one value")]
    EmptyLambdaPath,
}

/// Per-family penalty multipliers, applied on top of the table base values.
/// `beta_multiplier` scales the final penalty of every feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegularizationScales {
    pub beta_multiplier: f64,
    pub beta_lqp: f64,
    pub beta_hinge: f64,
    pub beta_threshold: f64,
    pub beta_categorical: f64,
}

impl Default for RegularizationScales {
    fn default() -> Self {
        Self {
            beta_multiplier: 1.0,
            beta_lqp: 1.0,
            beta_hinge: 1.0,
            beta_threshold: 1.0,
            beta_categorical: 1.0,
        }
    }
}

/// Presence rows weigh 1, background rows weigh 100, so the background sum
/// dominates the fit the way a Maxent density estimate expects.
pub fn compute_weights(labels: ArrayView1<f64>) -> Array1<f64> {
    labels.mapv(|y| if y == 1.0 { 1.0 } else { BACKGROUND_WEIGHT })
}

/// Computes the per-feature relative penalty vector.
///
/// For feature `j` with class table `T` and presence submatrix `Z1`:
///
/// ```text
/// class_j    = beta_family * interp(T, n_presence) / sqrt(n_presence)
/// penalty_j  = beta_multiplier * max(sd(Z1_j) * class_j,
///                                    0.001 * (max_j - min_j),
///                                    hinge/threshold floors)
/// ```
///
/// The hinge floor is `0.5 * max(sd(Z1_j), 1/sqrt(n_presence)) / sqrt(n_presence)`;
/// the threshold floor is 1 when the feature is constant over presence rows.
/// Standard deviations use one delta degree of freedom and are taken as zero
/// when only a single presence row exists.
pub fn compute_regularization(
    labels: ArrayView1<f64>,
    features: ArrayView2<f64>,
    feature_labels: &[FeatureLabel],
    scales: &RegularizationScales,
) -> Result<Array1<f64>, RegularizeError> {
    if labels.len() != features.nrows() {
        return Err(RegularizeError::ShapeMismatch {
            labels: labels.len(),
            rows: features.nrows(),
        });
    }
    if feature_labels.len() != features.ncols() {
        return Err(RegularizeError::LabelCountMismatch {
            labels: feature_labels.len(),
            cols: features.ncols(),
        });
    }

    let presence_rows: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|&(_, &y)| y == 1.0)
        .map(|(i, _)| i)
        .collect();
    let n_presence = presence_rows.len();
    if n_presence == 0 {
        return Err(RegularizeError::NoPresence);
    }
    let np = n_presence as f64;
    let sqrt_np = np.sqrt();

    let presence = features.select(Axis(0), &presence_rows);
    let presence_sd = if n_presence >= 2 {
        presence.std_axis(Axis(0), 1.0)
    } else {
        Array1::zeros(features.ncols())
    };
    let presence_sums = presence.sum_axis(Axis(0));
    let col_min = features.fold_axis(Axis(0), f64::INFINITY, |&acc, &v| acc.min(v));
    let col_max = features.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &v| acc.max(v));

    // Linear, quadratic and product share the table of the richest class present.
    let lqp_table = if feature_labels.iter().any(|l| l.family == FeatureType::Product) {
        PRODUCT_TABLE
    } else if feature_labels.iter().any(|l| l.family == FeatureType::Quadratic) {
        QUADRATIC_TABLE
    } else {
        LINEAR_TABLE
    };

    let mut penalties = Array1::zeros(features.ncols());
    for (j, label) in feature_labels.iter().enumerate() {
        let (table, beta) = match label.family {
            FeatureType::Linear | FeatureType::Quadratic | FeatureType::Product => {
                (lqp_table, scales.beta_lqp)
            }
            FeatureType::Hinge => (HINGE_TABLE, scales.beta_hinge),
            FeatureType::Threshold => (THRESHOLD_TABLE, scales.beta_threshold),
            FeatureType::Categorical => (CATEGORICAL_TABLE, scales.beta_categorical),
        };
        let class_penalty = beta * interpolate(table, np) / sqrt_np;
        let variance_penalty = presence_sd[j] * class_penalty;
        let range_floor = 0.001 * (col_max[j] - col_min[j]);
        let hinge_floor = if label.family == FeatureType::Hinge {
            0.5 * presence_sd[j].max(1.0 / sqrt_np) / sqrt_np
        } else {
            0.0
        };
        let threshold_floor = if label.family == FeatureType::Threshold
            && (presence_sums[j] == 0.0 || presence_sums[j] == np)
        {
            1.0
        } else {
            0.0
        };
        penalties[j] = scales.beta_multiplier
            * variance_penalty
                .max(range_floor)
                .max(hinge_floor)
                .max(threshold_floor);
    }
    Ok(penalties)
}

/// Builds the descending lambda path
/// `10^linspace(4, 0, n) * mean(penalties) * n_presence / sum(weights)`.
pub fn compute_lambdas(
    labels: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    penalties: ArrayView1<f64>,
    n_lambdas: usize,
) -> Result<Array1<f64>, RegularizeError> {
    if weights.len() != labels.len() {
        return Err(RegularizeError::WeightCountMismatch {
            weights: weights.len(),
            labels: labels.len(),
        });
    }
    if n_lambdas == 0 {
        return Err(RegularizeError::EmptyLambdaPath);
    }
    let n_presence = labels.iter().filter(|&&y| y == 1.0).count();
    if n_presence == 0 {
        return Err(RegularizeError::NoPresence);
    }
    let mean_penalty = penalties.mean().unwrap_or(0.0);
    if mean_penalty <= 0.0 {
        return Err(RegularizeError::DegeneratePenalties);
    }
    let scale = mean_penalty * n_presence as f64 / weights.sum();
    Ok(Array1::linspace(4.0, 0.0, n_lambdas).mapv(|e| 10f64.powf(e) * scale))
}

/// Piecewise-linear interpolation with boundary clamping.
fn interpolate(table: (&[f64], &[f64]), x: f64) -> f64 {
    let (xs, ys) = table;
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }
    for k in 1..xs.len() {
        if x <= xs[k] {
            let t = (x - xs[k - 1]) / (xs[k] - xs[k - 1]);
            return ys[k - 1] + t * (ys[k] - ys[k - 1]);
        }
    }
    ys[ys.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    fn labels_of(family: FeatureType, n: usize) -> Vec<FeatureLabel> {
        (0..n)
            .map(|j| FeatureLabel {
                family,
                description: format!("f{j}"),
            })
            .collect()
    }

    #[test]
    fn weights_are_one_for_presence_and_hundred_for_background() {
        let y = array![1.0, 0.0, 0.0, 1.0];
        let w = compute_weights(y.view());
        assert_eq!(w, array![1.0, 100.0, 100.0, 1.0]);
    }

    #[test]
    fn linear_penalty_matches_hand_computation() {
        // Presence rows hold [0, 2, 4, 6]: sd (ddof 1) = sqrt(20/3).
        let z = array![[0.0], [2.0], [4.0], [6.0], [1.0], [5.0]];
        let y = array![1.0, 1.0, 1.0, 1.0, 0.0, 0.0];
        let penalties = compute_regularization(
            y.view(),
            z.view(),
            &labels_of(FeatureType::Linear, 1),
            &RegularizationScales::default(),
        )
        .unwrap();

        // Base at 4 presences interpolates to 1.0; class penalty 1/sqrt(4).
        let expected = (20.0f64 / 3.0).sqrt() * 0.5;
        assert_abs_diff_eq!(penalties[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn more_presence_rows_shrink_the_penalty() {
        let build = |n_presence: usize| {
            let mut rows = Vec::new();
            let mut y = Vec::new();
            for i in 0..n_presence {
                rows.push((i % 5) as f64);
                y.push(1.0);
            }
            rows.push(2.0);
            y.push(0.0);
            let z = Array2::from_shape_vec((rows.len(), 1), rows).unwrap();
            let y = Array1::from_vec(y);
            compute_regularization(
                y.view(),
                z.view(),
                &labels_of(FeatureType::Linear, 1),
                &RegularizationScales::default(),
            )
            .unwrap()[0]
        };
        assert!(build(100) < build(10));
    }

    #[test]
    fn product_presence_switches_the_lqp_table() {
        let z = array![[0.0, 0.0], [2.0, 4.0], [4.0, 8.0], [6.0, 12.0], [1.0, 2.0]];
        let y = array![1.0, 1.0, 1.0, 1.0, 0.0];

        let linear_only = vec![
            FeatureLabel { family: FeatureType::Linear, description: "a".into() },
            FeatureLabel { family: FeatureType::Linear, description: "b".into() },
        ];
        let with_product = vec![
            FeatureLabel { family: FeatureType::Linear, description: "a".into() },
            FeatureLabel { family: FeatureType::Product, description: "a*b".into() },
        ];

        let scales = RegularizationScales::default();
        let plain = compute_regularization(y.view(), z.view(), &linear_only, &scales).unwrap();
        let rich = compute_regularization(y.view(), z.view(), &with_product, &scales).unwrap();
        // The product table starts at 2.6 versus 1.0, so the shared linear
        // column is penalized harder when a product feature is present.
        assert!(rich[0] > plain[0]);
    }

    #[test]
    fn hinge_floor_kicks_in_for_constant_presence_columns() {
        // Hinge column constant on presence rows: sd = 0, floor = 0.5 / n.
        let z = array![[0.7], [0.7], [0.7], [0.7], [0.0], [1.0]];
        let y = array![1.0, 1.0, 1.0, 1.0, 0.0, 0.0];
        let penalties = compute_regularization(
            y.view(),
            z.view(),
            &labels_of(FeatureType::Hinge, 1),
            &RegularizationScales::default(),
        )
        .unwrap();
        assert_abs_diff_eq!(penalties[0], 0.5 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn threshold_floor_kicks_in_for_degenerate_presence_columns() {
        let z = array![[1.0, 1.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]];
        let y = array![1.0, 1.0, 1.0, 0.0];
        let penalties = compute_regularization(
            y.view(),
            z.view(),
            &labels_of(FeatureType::Threshold, 2),
            &RegularizationScales::default(),
        )
        .unwrap();
        // Column 0 is all-one over presence rows; column 1 varies.
        assert_abs_diff_eq!(penalties[0], 1.0, epsilon = 1e-12);
        assert!(penalties[1] < 1.0);
    }

    #[test]
    fn beta_multipliers_scale_penalties_linearly() {
        let z = array![[0.0], [2.0], [4.0], [6.0], [1.0]];
        let y = array![1.0, 1.0, 1.0, 1.0, 0.0];
        let labels = labels_of(FeatureType::Linear, 1);

        let base = compute_regularization(
            y.view(),
            z.view(),
            &labels,
            &RegularizationScales::default(),
        )
        .unwrap();
        let doubled_global = compute_regularization(
            y.view(),
            z.view(),
            &labels,
            &RegularizationScales {
                beta_multiplier: 2.0,
                ..RegularizationScales::default()
            },
        )
        .unwrap();
        let doubled_family = compute_regularization(
            y.view(),
            z.view(),
            &labels,
            &RegularizationScales {
                beta_lqp: 2.0,
                ..RegularizationScales::default()
            },
        )
        .unwrap();

        assert_abs_diff_eq!(doubled_global[0], 2.0 * base[0], epsilon = 1e-12);
        assert_abs_diff_eq!(doubled_family[0], 2.0 * base[0], epsilon = 1e-12);
    }

    #[test]
    fn regularization_requires_a_presence_row() {
        let z = array![[1.0], [2.0]];
        let y = array![0.0, 0.0];
        assert!(matches!(
            compute_regularization(
                y.view(),
                z.view(),
                &labels_of(FeatureType::Linear, 1),
                &RegularizationScales::default(),
            ),
            Err(RegularizeError::NoPresence)
        ));
    }

    #[test]
    fn lambda_path_is_positive_strictly_decreasing_and_spans_four_decades() {
        let y = array![1.0, 0.0];
        let w = array![1.0, 100.0];
        let penalties = array![2.0, 4.0];
        let lambdas = compute_lambdas(y.view(), w.view(), penalties.view(), 200).unwrap();

        assert_eq!(lambdas.len(), 200);
        assert!(lambdas.iter().all(|&l| l > 0.0));
        for k in 1..lambdas.len() {
            assert!(lambdas[k - 1] > lambdas[k]);
        }
        // mean penalty 3, one presence, total weight 101.
        assert_abs_diff_eq!(lambdas[199], 3.0 / 101.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lambdas[0], 1e4 * 3.0 / 101.0, epsilon = 1e-8);
    }

    #[test]
    fn lambda_path_rejects_degenerate_inputs() {
        let y = array![1.0, 0.0];
        let w = array![1.0, 100.0];
        assert!(matches!(
            compute_lambdas(y.view(), w.view(), array![0.0, 0.0].view(), 10),
            Err(RegularizeError::DegeneratePenalties)
        ));
        assert!(matches!(
            compute_lambdas(
                array![0.0, 0.0].view(),
                w.view(),
                array![1.0, 1.0].view(),
                10
            ),
            Err(RegularizeError::NoPresence)
        ));
        assert!(matches!(
            compute_lambdas(y.view(), w.view(), array![1.0, 1.0].view(), 0),
            Err(RegularizeError::EmptyLambdaPath)
        ));
    }

    #[test]
    fn interpolation_clamps_at_table_boundaries() {
        let table = (&[0.0, 10.0, 30.0, 100.0][..], &[1.0, 1.0, 0.2, 0.05][..]);
        assert_abs_diff_eq!(interpolate(table, -5.0), 1.0);
        assert_abs_diff_eq!(interpolate(table, 500.0), 0.05);
        assert_abs_diff_eq!(interpolate(table, 20.0), 0.6, epsilon = 1e-12);
    }
}
