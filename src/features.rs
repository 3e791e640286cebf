//! # Feature Derivation
//!
//! Maps raw covariate tables to the derived feature matrices the model is fit
//! on. The transformer is stateful in the scikit-learn sense: `fit_transform`
//! records everything observed on the training table (hinge knots, threshold
//! positions, categorical levels, per-feature bounds) and `transform` replays
//! that state exactly, so feature columns keep their meaning and order between
//! fitting and prediction.
//!
//! Feature families, per continuous covariate:
//! - linear: the covariate itself
//! - quadratic: the covariate squared
//! - product: pairwise products of distinct continuous covariates
//! - hinge: piecewise-linear ramps anchored at evenly spaced knots
//! - threshold: step indicators at evenly spaced interior split points
//!
//! Categorical covariates are always one-hot expanded over their training
//! levels, independent of the requested family set.

use crate::data::{Covariates, CovariateColumn, CovariateKind};
use ndarray::{Array1, Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors raised while validating configuration values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown feature type '{0}'; expected linear, quadratic, product, hinge, threshold, categorical, auto, or a string of the letters 'lqpht'")]
    UnknownFeatureType(String),

    #[error("the feature type set is empty; at least one feature family is required")]
    EmptyFeatureSet,

    #[error("unknown scorer '{0}'; expected roc_auc, log_loss, or accuracy")]
    UnknownScorer(String),

    #[error("unknown lambda selection policy '{0}'; expected best or last")]
    UnknownLambdaSelect(String),

    #[error("unknown output transform '{0}'; expected raw, exponential, logistic, or cloglog")]
    UnknownTransform(String),

    #[error("{name} must be {requirement}, got {value}")]
    InvalidHyperparameter {
        name: &'static str,
        requirement: &'static str,
        value: String,
    },
}

/// Errors raised while deriving features from a covariate table.
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("the feature transformer has not been fitted yet")]
    NotFitted,

    #[error("the fitted transformer expects {expected} covariate columns, got {found}")]
    ColumnCountMismatch { expected: usize, found: usize },

    #[error("covariate column {index} was named '{expected}' at fitting time, got '{found}'")]
    ColumnNameMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("covariate column '{column}' changed kind since fitting (continuous vs categorical)")]
    ColumnKindMismatch { column: String },

    #[error("the requested feature families derive no feature columns from this covariate table")]
    NoDerivableFeatures,
}

/// The families of derived features.
///
/// The declaration order is canonical: requested sets are sorted into it so
/// feature-column layout never depends on how the set was written down.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Linear,
    Quadratic,
    Product,
    Hinge,
    Threshold,
    Categorical,
}

/// The five families applicable to continuous covariates, in canonical order.
const CONTINUOUS_FAMILIES: [FeatureType; 5] = [
    FeatureType::Linear,
    FeatureType::Quadratic,
    FeatureType::Product,
    FeatureType::Hinge,
    FeatureType::Threshold,
];

impl FeatureType {
    /// Parses a set of feature-type names into a deduplicated, canonically
    /// ordered list.
    ///
    /// Accepts full names (`"hinge"`), the single-letter shorthand classes
    /// (`"l"`, `"q"`, `"p"`, `"h"`, `"t"`), compact letter strings (`"lqp"`),
    /// and `"auto"`/`"a"` for all five continuous families.
    pub fn parse_set<I, S>(items: I) -> Result<Vec<FeatureType>, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Vec::new();
        for item in items {
            let name = item.as_ref().trim().to_lowercase();
            match name.as_str() {
                "linear" | "l" => set.push(FeatureType::Linear),
                "quadratic" | "q" => set.push(FeatureType::Quadratic),
                "product" | "p" => set.push(FeatureType::Product),
                "hinge" | "h" => set.push(FeatureType::Hinge),
                "threshold" | "t" => set.push(FeatureType::Threshold),
                "categorical" => set.push(FeatureType::Categorical),
                "auto" | "a" => set.extend(CONTINUOUS_FAMILIES),
                compact if !compact.is_empty() && compact.chars().all(|c| "lqphta".contains(c)) => {
                    for c in compact.chars() {
                        match c {
                            'l' => set.push(FeatureType::Linear),
                            'q' => set.push(FeatureType::Quadratic),
                            'p' => set.push(FeatureType::Product),
                            'h' => set.push(FeatureType::Hinge),
                            't' => set.push(FeatureType::Threshold),
                            'a' => set.extend(CONTINUOUS_FAMILIES),
                            _ => unreachable!(),
                        }
                    }
                }
                other => return Err(ConfigError::UnknownFeatureType(other.to_string())),
            }
        }
        if set.is_empty() {
            return Err(ConfigError::EmptyFeatureSet);
        }
        set.sort();
        set.dedup();
        Ok(set)
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeatureType::Linear => "linear",
            FeatureType::Quadratic => "quadratic",
            FeatureType::Product => "product",
            FeatureType::Hinge => "hinge",
            FeatureType::Threshold => "threshold",
            FeatureType::Categorical => "categorical",
        })
    }
}

/// Family and provenance of one derived feature column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLabel {
    pub family: FeatureType,
    pub description: String,
}

/// Training-observed state for one continuous covariate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ContinuousState {
    index: usize,
    name: String,
    min: f64,
    max: f64,
    /// Hinge knots, linspace over [min, max]. Empty for a constant covariate.
    hinge_knots: Vec<f64>,
    /// Interior split points. Empty for a constant covariate.
    thresholds: Vec<f64>,
}

/// Training-observed state for one categorical covariate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoricalState {
    index: usize,
    name: String,
    /// Distinct level codes seen at fitting time, ascending.
    levels: Vec<f64>,
}

/// A fitted feature transformer.
///
/// Construct with the requested families and basis sizes, then call
/// [`fit_transform`](Self::fit_transform) once on the training table. The
/// recorded state is serializable so a persisted model transforms new data
/// exactly as it did at fitting time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxentFeatures {
    feature_types: Vec<FeatureType>,
    n_hinge_features: usize,
    n_threshold_features: usize,
    schema: Vec<CovariateColumn>,
    // Empty vecs are skipped: TOML rejects a plain `[]` value once a
    // sibling array-of-tables has been emitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    continuous: Vec<ContinuousState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    categorical: Vec<CategoricalState>,
    labels: Vec<FeatureLabel>,
    feature_min: Array1<f64>,
    feature_max: Array1<f64>,
}

impl MaxentFeatures {
    pub fn new(
        feature_types: Vec<FeatureType>,
        n_hinge_features: usize,
        n_threshold_features: usize,
    ) -> Self {
        let mut feature_types = feature_types;
        feature_types.sort();
        feature_types.dedup();
        Self {
            feature_types,
            n_hinge_features,
            n_threshold_features,
            schema: Vec::new(),
            continuous: Vec::new(),
            categorical: Vec::new(),
            labels: Vec::new(),
            feature_min: Array1::zeros(0),
            feature_max: Array1::zeros(0),
        }
    }

    /// Records derivation state from the training table and returns its
    /// feature matrix. Any previously fitted state is replaced.
    pub fn fit_transform(&mut self, x: &Covariates) -> Result<Array2<f64>, FeatureError> {
        let mut continuous = Vec::new();
        let mut categorical = Vec::new();
        for (index, column) in x.columns().iter().enumerate() {
            match column.kind {
                CovariateKind::Continuous => {
                    let values = x.column(index);
                    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    let (hinge_knots, thresholds) = if max > min {
                        (
                            Array1::linspace(min, max, self.n_hinge_features).to_vec(),
                            interior_points(min, max, self.n_threshold_features),
                        )
                    } else {
                        (Vec::new(), Vec::new())
                    };
                    continuous.push(ContinuousState {
                        index,
                        name: column.name.clone(),
                        min,
                        max,
                        hinge_knots,
                        thresholds,
                    });
                }
                CovariateKind::Categorical => {
                    let mut levels: Vec<f64> = x.column(index).to_vec();
                    levels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                    levels.dedup();
                    categorical.push(CategoricalState {
                        index,
                        name: column.name.clone(),
                        levels,
                    });
                }
            }
        }

        self.schema = x.columns().to_vec();
        self.continuous = continuous;
        self.categorical = categorical;

        let (matrix, labels) = self.derive(x)?;
        self.labels = labels;
        self.feature_min = matrix.fold_axis(ndarray::Axis(0), f64::INFINITY, |&acc, &v| acc.min(v));
        self.feature_max =
            matrix.fold_axis(ndarray::Axis(0), f64::NEG_INFINITY, |&acc, &v| acc.max(v));
        Ok(matrix)
    }

    /// Replays the fitted derivation on a new table with the same schema.
    pub fn transform(&self, x: &Covariates) -> Result<Array2<f64>, FeatureError> {
        if self.schema.is_empty() {
            return Err(FeatureError::NotFitted);
        }
        if x.columns().len() != self.schema.len() {
            return Err(FeatureError::ColumnCountMismatch {
                expected: self.schema.len(),
                found: x.columns().len(),
            });
        }
        for (index, (fitted, found)) in self.schema.iter().zip(x.columns()).enumerate() {
            if fitted.name != found.name {
                return Err(FeatureError::ColumnNameMismatch {
                    index,
                    expected: fitted.name.clone(),
                    found: found.name.clone(),
                });
            }
            if fitted.kind != found.kind {
                return Err(FeatureError::ColumnKindMismatch {
                    column: fitted.name.clone(),
                });
            }
        }
        let (matrix, _) = self.derive(x)?;
        Ok(matrix)
    }

    /// Clamps each feature column to its training-observed [min, max].
    pub fn clamp_features(&self, z: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(z.ncols(), self.n_features());
        let mut clamped = z.to_owned();
        for (j, mut column) in clamped.columns_mut().into_iter().enumerate() {
            let lo = self.feature_min[j];
            let hi = self.feature_max[j];
            column.mapv_inplace(|v| v.clamp(lo, hi));
        }
        clamped
    }

    pub fn n_features(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[FeatureLabel] {
        &self.labels
    }

    /// The covariate schema recorded at fitting time.
    pub fn schema(&self) -> &[CovariateColumn] {
        &self.schema
    }

    /// Derives all feature columns from a table, using the recorded state.
    /// Families iterate in canonical order, covariates in table order, so the
    /// layout is identical between fitting and prediction.
    fn derive(&self, x: &Covariates) -> Result<(Array2<f64>, Vec<FeatureLabel>), FeatureError> {
        let mut columns: Vec<(FeatureLabel, Array1<f64>)> = Vec::new();

        for family in &self.feature_types {
            match family {
                FeatureType::Linear => {
                    for c in &self.continuous {
                        columns.push((
                            FeatureLabel {
                                family: FeatureType::Linear,
                                description: c.name.clone(),
                            },
                            x.column(c.index).to_owned(),
                        ));
                    }
                }
                FeatureType::Quadratic => {
                    for c in &self.continuous {
                        columns.push((
                            FeatureLabel {
                                family: FeatureType::Quadratic,
                                description: format!("{}^2", c.name),
                            },
                            x.column(c.index).mapv(|v| v * v),
                        ));
                    }
                }
                FeatureType::Product => {
                    for (a, b) in pairs(&self.continuous) {
                        let product = Zip::from(x.column(a.index))
                            .and(x.column(b.index))
                            .map_collect(|&u, &v| u * v);
                        columns.push((
                            FeatureLabel {
                                family: FeatureType::Product,
                                description: format!("{}*{}", a.name, b.name),
                            },
                            product,
                        ));
                    }
                }
                FeatureType::Hinge => {
                    for c in &self.continuous {
                        let n = c.hinge_knots.len();
                        for &knot in c.hinge_knots.iter().take(n.saturating_sub(1)) {
                            columns.push((
                                FeatureLabel {
                                    family: FeatureType::Hinge,
                                    description: format!("hinge({}, {knot:.6}..max)", c.name),
                                },
                                x.column(c.index).mapv(|v| hinge_value(v, knot, c.max)),
                            ));
                        }
                        for &knot in c.hinge_knots.iter().skip(1) {
                            columns.push((
                                FeatureLabel {
                                    family: FeatureType::Hinge,
                                    description: format!("hinge({}, min..{knot:.6})", c.name),
                                },
                                x.column(c.index).mapv(|v| hinge_value(v, c.min, knot)),
                            ));
                        }
                    }
                }
                FeatureType::Threshold => {
                    for c in &self.continuous {
                        for &t in &c.thresholds {
                            columns.push((
                                FeatureLabel {
                                    family: FeatureType::Threshold,
                                    description: format!("{}>{t:.6}", c.name),
                                },
                                x.column(c.index).mapv(|v| if v > t { 1.0 } else { 0.0 }),
                            ));
                        }
                    }
                }
                // Categorical one-hots are appended below regardless of the
                // requested set; a redundant request adds nothing here.
                FeatureType::Categorical => {}
            }
        }

        for c in &self.categorical {
            for &level in &c.levels {
                columns.push((
                    FeatureLabel {
                        family: FeatureType::Categorical,
                        description: format!("{}=={level}", c.name),
                    },
                    x.column(c.index).mapv(|v| if v == level { 1.0 } else { 0.0 }),
                ));
            }
        }

        if columns.is_empty() {
            return Err(FeatureError::NoDerivableFeatures);
        }

        let n_samples = x.n_samples();
        let mut matrix = Array2::zeros((n_samples, columns.len()));
        let mut labels = Vec::with_capacity(columns.len());
        for (j, (label, column)) in columns.into_iter().enumerate() {
            matrix.column_mut(j).assign(&column);
            labels.push(label);
        }
        Ok((matrix, labels))
    }
}

/// A 0-to-1 ramp between `lo` and `hi`, saturated outside.
fn hinge_value(x: f64, lo: f64, hi: f64) -> f64 {
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// `n` evenly spaced points strictly inside (min, max).
fn interior_points(min: f64, max: f64, n: usize) -> Vec<f64> {
    Array1::linspace(min, max, n + 2)
        .iter()
        .skip(1)
        .take(n)
        .copied()
        .collect()
}

/// All ordered pairs (i < j) of continuous covariates.
fn pairs(states: &[ContinuousState]) -> impl Iterator<Item = (&ContinuousState, &ContinuousState)> {
    use itertools::Itertools;
    states.iter().tuple_combinations()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Covariates;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn fit_on(
        x: &Covariates,
        types: &[FeatureType],
        n_hinge: usize,
        n_threshold: usize,
    ) -> (MaxentFeatures, Array2<f64>) {
        let mut features = MaxentFeatures::new(types.to_vec(), n_hinge, n_threshold);
        let z = features.fit_transform(x).unwrap();
        (features, z)
    }

    #[test]
    fn parse_set_accepts_names_shorthand_and_auto() {
        let parsed = FeatureType::parse_set(["linear", "hinge", "product"]).unwrap();
        assert_eq!(
            parsed,
            vec![FeatureType::Linear, FeatureType::Product, FeatureType::Hinge]
        );

        let parsed = FeatureType::parse_set(["lqp"]).unwrap();
        assert_eq!(
            parsed,
            vec![FeatureType::Linear, FeatureType::Quadratic, FeatureType::Product]
        );

        let parsed = FeatureType::parse_set(["auto"]).unwrap();
        assert_eq!(parsed.len(), 5);
        assert!(!parsed.contains(&FeatureType::Categorical));

        // Duplicates collapse and order canonicalizes.
        let parsed = FeatureType::parse_set(["h", "l", "hinge", "L"]).unwrap();
        assert_eq!(parsed, vec![FeatureType::Linear, FeatureType::Hinge]);
    }

    #[test]
    fn parse_set_rejects_unknown_and_empty() {
        assert!(matches!(
            FeatureType::parse_set(["bogus"]),
            Err(ConfigError::UnknownFeatureType(_))
        ));
        assert!(matches!(
            FeatureType::parse_set(Vec::<&str>::new()),
            Err(ConfigError::EmptyFeatureSet)
        ));
    }

    #[test]
    fn linear_and_quadratic_columns_are_exact() {
        let x = Covariates::continuous(array![[1.0, 2.0], [3.0, -1.0]], &["a", "b"]).unwrap();
        let (features, z) = fit_on(&x, &[FeatureType::Linear, FeatureType::Quadratic], 4, 4);

        assert_eq!(z.ncols(), 4);
        assert_eq!(features.labels()[0].description, "a");
        assert_eq!(features.labels()[3].description, "b^2");
        assert_abs_diff_eq!(z[[0, 0]], 1.0);
        assert_abs_diff_eq!(z[[1, 1]], -1.0);
        assert_abs_diff_eq!(z[[1, 2]], 9.0);
        assert_abs_diff_eq!(z[[1, 3]], 1.0);
    }

    #[test]
    fn product_columns_cover_distinct_pairs_in_order() {
        let x = Covariates::continuous(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            &["a", "b", "c"],
        )
        .unwrap();
        let (features, z) = fit_on(&x, &[FeatureType::Product], 4, 4);

        let descriptions: Vec<&str> = features
            .labels()
            .iter()
            .map(|l| l.description.as_str())
            .collect();
        assert_eq!(descriptions, vec!["a*b", "a*c", "b*c"]);
        assert_abs_diff_eq!(z[[0, 0]], 2.0);
        assert_abs_diff_eq!(z[[0, 1]], 3.0);
        assert_abs_diff_eq!(z[[1, 2]], 30.0);
    }

    #[test]
    fn hinge_columns_ramp_between_knots_and_range_ends() {
        let x = Covariates::continuous(
            array![[0.0], [1.0], [2.0], [3.0], [4.0]],
            &["a"],
        )
        .unwrap();
        let (_, z) = fit_on(&x, &[FeatureType::Hinge], 3, 4);

        // Knots at [0, 2, 4]: two left hinges (0..max, 2..max) then two right
        // hinges (min..2, min..4). All ramp values are exact binary fractions.
        assert_eq!(z.ncols(), 4);
        let expected = array![
            [0.0, 0.0, 0.0, 0.0],
            [0.25, 0.0, 0.5, 0.25],
            [0.5, 0.0, 1.0, 0.5],
            [0.75, 0.5, 1.0, 0.75],
            [1.0, 1.0, 1.0, 1.0],
        ];
        assert_eq!(z, expected);
    }

    #[test]
    fn threshold_columns_split_at_interior_points() {
        let x = Covariates::continuous(
            array![[0.0], [1.0], [2.0], [3.0], [4.0]],
            &["a"],
        )
        .unwrap();
        let (features, z) = fit_on(&x, &[FeatureType::Threshold], 4, 3);

        // Interior points of linspace(0, 4, 5): thresholds at 1, 2, 3.
        assert_eq!(z.ncols(), 3);
        assert_eq!(features.labels()[0].family, FeatureType::Threshold);
        let expected = array![
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, 1.0, 1.0],
        ];
        assert_eq!(z, expected);
    }

    #[test]
    fn categorical_levels_one_hot_in_sorted_order_even_when_not_requested() {
        let x = Covariates::new(
            array![[0.5, 3.0], [1.5, 1.0], [2.5, 3.0]],
            vec![
                CovariateColumn::continuous("temp"),
                CovariateColumn::categorical("soil"),
            ],
        )
        .unwrap();
        let (features, z) = fit_on(&x, &[FeatureType::Linear], 4, 4);

        // One linear column plus one-hots for levels 1 and 3.
        assert_eq!(z.ncols(), 3);
        assert_eq!(features.labels()[1].description, "soil==1");
        assert_eq!(features.labels()[2].description, "soil==3");
        assert_eq!(z.column(1), array![0.0, 1.0, 0.0]);
        assert_eq!(z.column(2), array![1.0, 0.0, 1.0]);
    }

    #[test]
    fn unseen_categorical_level_maps_to_all_zero_indicators() {
        let train = Covariates::new(
            array![[1.0], [2.0]],
            vec![CovariateColumn::categorical("soil")],
        )
        .unwrap();
        let (features, _) = fit_on(&train, &[FeatureType::Linear], 4, 4);

        let test = Covariates::new(
            array![[7.0]],
            vec![CovariateColumn::categorical("soil")],
        )
        .unwrap();
        let z = features.transform(&test).unwrap();
        assert_eq!(z, array![[0.0, 0.0]]);
    }

    #[test]
    fn transform_replays_fit_exactly_on_the_training_table() {
        let x = Covariates::new(
            array![
                [0.1, 10.0, 2.0],
                [0.7, 12.5, 1.0],
                [0.4, 11.0, 2.0],
                [0.9, 14.0, 3.0]
            ],
            vec![
                CovariateColumn::continuous("a"),
                CovariateColumn::continuous("b"),
                CovariateColumn::categorical("c"),
            ],
        )
        .unwrap();
        let (features, z_fit) = fit_on(
            &x,
            &[
                FeatureType::Linear,
                FeatureType::Quadratic,
                FeatureType::Product,
                FeatureType::Hinge,
                FeatureType::Threshold,
            ],
            5,
            5,
        );
        let z_again = features.transform(&x).unwrap();
        assert_eq!(z_fit, z_again);
        assert_eq!(features.n_features(), z_fit.ncols());
        assert_eq!(features.labels().len(), z_fit.ncols());
    }

    #[test]
    fn transform_uses_training_knots_for_out_of_range_data() {
        let train = Covariates::continuous(array![[0.0], [4.0]], &["a"]).unwrap();
        let (features, _) = fit_on(&train, &[FeatureType::Hinge], 3, 4);

        let test = Covariates::continuous(array![[10.0], [-10.0]], &["a"]).unwrap();
        let z = features.transform(&test).unwrap();
        // Ramps saturate at 1 above the training range and 0 below it.
        assert!(z.row(0).iter().all(|&v| v == 1.0));
        assert!(z.row(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn transform_rejects_schema_changes() {
        let train = Covariates::continuous(array![[0.0, 1.0], [2.0, 3.0]], &["a", "b"]).unwrap();
        let (features, _) = fit_on(&train, &[FeatureType::Linear], 4, 4);

        let fewer = Covariates::continuous(array![[0.0], [2.0]], &["a"]).unwrap();
        assert!(matches!(
            features.transform(&fewer),
            Err(FeatureError::ColumnCountMismatch { expected: 2, found: 1 })
        ));

        let renamed = Covariates::continuous(array![[0.0, 1.0], [2.0, 3.0]], &["a", "z"]).unwrap();
        assert!(matches!(
            features.transform(&renamed),
            Err(FeatureError::ColumnNameMismatch { index: 1, .. })
        ));

        let rekinded = Covariates::new(
            array![[0.0, 1.0], [2.0, 3.0]],
            vec![
                CovariateColumn::continuous("a"),
                CovariateColumn::categorical("b"),
            ],
        )
        .unwrap();
        assert!(matches!(
            features.transform(&rekinded),
            Err(FeatureError::ColumnKindMismatch { .. })
        ));
    }

    #[test]
    fn transform_before_fit_fails() {
        let features = MaxentFeatures::new(vec![FeatureType::Linear], 4, 4);
        let x = Covariates::continuous(array![[1.0]], &["a"]).unwrap();
        assert!(matches!(features.transform(&x), Err(FeatureError::NotFitted)));
    }

    #[test]
    fn clamp_features_bounds_columns_to_training_range() {
        let train = Covariates::continuous(array![[0.0], [2.0], [4.0]], &["a"]).unwrap();
        let (features, _) = fit_on(&train, &[FeatureType::Linear, FeatureType::Quadratic], 4, 4);

        let wild = array![[-5.0, 100.0], [1.0, 1.0], [9.0, -3.0]];
        let clamped = features.clamp_features(wild.view());
        let expected = array![[0.0, 16.0], [1.0, 1.0], [4.0, 0.0]];
        assert_eq!(clamped, expected);
    }

    #[test]
    fn constant_covariate_derives_no_hinge_or_threshold_columns() {
        let x = Covariates::continuous(
            array![[5.0, 1.0], [5.0, 2.0], [5.0, 3.0]],
            &["flat", "a"],
        )
        .unwrap();
        let (features, z) = fit_on(
            &x,
            &[FeatureType::Linear, FeatureType::Hinge, FeatureType::Threshold],
            3,
            2,
        );

        // Both linear columns survive; hinge and threshold come only from "a":
        // 2*(3-1) hinges plus 2 thresholds.
        assert_eq!(z.ncols(), 2 + 4 + 2);
        let flat_hinges = features
            .labels()
            .iter()
            .filter(|l| l.family == FeatureType::Hinge && l.description.contains("flat"))
            .count();
        assert_eq!(flat_hinges, 0);
    }

    #[test]
    fn no_derivable_features_is_an_error() {
        let x = Covariates::new(
            array![[1.0], [2.0]],
            vec![CovariateColumn::categorical("soil")],
        )
        .unwrap();
        // Product features need at least two continuous covariates and the
        // table has none, but the categorical one-hots still derive.
        let mut features = MaxentFeatures::new(vec![FeatureType::Product], 4, 4);
        assert!(features.fit_transform(&x).is_ok());

        // With no categorical columns either, nothing derives.
        let empty = Covariates::continuous(array![[1.0], [2.0]], &["a"]).unwrap();
        let mut features = MaxentFeatures::new(vec![FeatureType::Product], 4, 4);
        assert!(matches!(
            features.fit_transform(&empty),
            Err(FeatureError::NoDerivableFeatures)
        ));
    }
}
