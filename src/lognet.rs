//! # Penalized Logistic Path Solver
//!
//! Fits a full path of L1/L2-penalized logistic regressions across a
//! descending lambda sequence, glmnet style: an outer IRLS loop builds a
//! weighted quadratic approximation to the log-likelihood and an inner cyclic
//! coordinate descent loop solves it with per-feature soft-thresholding.
//! Warm starts carry coefficients from each lambda to the next.
//!
//! Alongside the full-data path, `fit` runs stratified k-fold cross-validation
//! and stores one held-out score per lambda, so callers can pick either the
//! final path column or the best-scoring one. The [`PathSolver`] trait is the
//! narrow interface the estimator consumes; it exists so orchestration logic
//! can be tested against a deterministic stand-in.

use crate::metrics::Scorer;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rayon::prelude::*;
use std::fmt;
use thiserror::Error;

/// Linear predictors are clamped to this magnitude before exponentiation.
const ETA_CLAMP: f64 = 30.0;
/// Fitted probabilities are kept this far away from 0 and 1.
const PROB_EPS: f64 = 1e-8;
/// Floor for the IRLS variance weights.
const MIN_WEIGHT: f64 = 1e-6;
/// Cap on coordinate descent sweeps per quadratic approximation.
const MAX_CD_SWEEPS: usize = 1000;

/// Default number of cross-validation folds.
pub const DEFAULT_N_FOLDS: usize = 3;
/// Default cap on IRLS iterations per lambda.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;
/// Default convergence tolerance on coefficient updates.
pub const DEFAULT_TOLERANCE: f64 = 1e-7;

/// A comprehensive error type for the penalized path fit.
#[derive(Error, Debug)]
pub enum LognetError {
    #[error("feature matrix has {rows} rows but {labels} labels were supplied")]
    ShapeMismatch { rows: usize, labels: usize },

    #[error("sample weights have length {weights}, expected {expected}")]
    WeightLength { weights: usize, expected: usize },

    #[error("relative penalties have length {penalties}, expected {expected} (one per feature)")]
    PenaltyLength { penalties: usize, expected: usize },

    #[error("labels must be exactly 0 or 1; found {value} at row {row}")]
    NonBinaryLabel { row: usize, value: f64 },

    #[error("labels contain a single class; a logistic path needs both presence and background")]
    SingleClass,

    #[error("non-finite value in the feature matrix at row {row}, column {col}")]
    NonFiniteFeature { row: usize, col: usize },

    #[error("invalid sample weight {value} at row {row}; weights must be finite and non-negative")]
    InvalidWeight { row: usize, value: f64 },

    #[error("sample weights sum to zero")]
    ZeroWeightSum,

    #[error("invalid relative penalty {value} at feature {index}; penalties must be finite and non-negative")]
    InvalidPenalty { index: usize, value: f64 },

    #[error("the lambda path must be non-empty, finite, positive, and strictly decreasing")]
    InvalidLambdaPath,

    #[error("elastic-net mixing alpha must lie in [0, 1], got {0}")]
    InvalidAlpha(f64),

    #[error("cross-validation needs at least 3 folds, got {0}")]
    TooFewFolds(usize),

    #[error("only {count} {class} samples for {folds}-fold stratified cross-validation")]
    ClassSmallerThanFolds {
        class: &'static str,
        count: usize,
        folds: usize,
    },

    #[error("coefficients became non-finite at lambda index {index}")]
    Diverged { index: usize },

    #[error("failed to build the cross-validation thread pool: {0}")]
    ThreadPool(String),

    #[error("the solver has not been fitted yet")]
    NotFitted,
}

/// The narrow solver interface the estimator drives: fit once, then read the
/// coefficient path and the cross-validated best lambda index.
pub trait PathSolver: fmt::Debug + Send + Sync {
    fn fit(
        &mut self,
        features: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        weights: ArrayView1<f64>,
        penalties: ArrayView1<f64>,
    ) -> Result<(), LognetError>;

    /// Coefficients, one column per lambda (descending).
    fn coef_path(&self) -> ArrayView2<'_, f64>;

    /// Intercepts, one per lambda. Used inside the solver and its
    /// cross-validation; Maxent prediction links deliberately exclude them.
    fn intercept_path(&self) -> ArrayView1<'_, f64>;

    /// Index of the lambda with the highest mean held-out score. Ties resolve
    /// to the smallest index, i.e. the most regularized candidate.
    fn best_index(&self) -> Result<usize, LognetError>;

    fn n_lambda(&self) -> usize;
}

/// Solver configuration. The Maxent estimator always passes `alpha = 1`
/// (lasso), `standardize = false`, and `fit_intercept = true`; the remaining
/// knobs are exposed for direct users of the solver.
#[derive(Debug, Clone)]
pub struct LognetSettings {
    /// Elastic-net mixing: 1 is pure lasso, 0 pure ridge.
    pub alpha: f64,
    /// Strictly decreasing positive penalty strengths.
    pub lambda_path: Array1<f64>,
    /// Standardize features internally; coefficients are returned on the
    /// original scale either way.
    pub standardize: bool,
    pub fit_intercept: bool,
    pub scorer: Scorer,
    pub n_folds: usize,
    /// Worker threads for cross-validation folds; 1 or 0 runs serially.
    pub n_jobs: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl LognetSettings {
    pub fn new(lambda_path: Array1<f64>, scorer: Scorer, n_jobs: usize) -> Self {
        Self {
            alpha: 1.0,
            lambda_path,
            standardize: false,
            fit_intercept: true,
            scorer,
            n_folds: DEFAULT_N_FOLDS,
            n_jobs,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// The coordinate-descent path solver.
#[derive(Debug)]
pub struct Lognet {
    settings: LognetSettings,
    coef_path: Array2<f64>,
    intercept_path: Array1<f64>,
    cv_scores: Array1<f64>,
    best: Option<usize>,
}

impl Lognet {
    pub fn new(settings: LognetSettings) -> Self {
        Self {
            settings,
            coef_path: Array2::zeros((0, 0)),
            intercept_path: Array1::zeros(0),
            cv_scores: Array1::zeros(0),
            best: None,
        }
    }

    /// Mean held-out score per lambda, in path order.
    pub fn cv_scores(&self) -> ArrayView1<'_, f64> {
        self.cv_scores.view()
    }
}

impl PathSolver for Lognet {
    fn fit(
        &mut self,
        features: ArrayView2<f64>,
        labels: ArrayView1<f64>,
        weights: ArrayView1<f64>,
        penalties: ArrayView1<f64>,
    ) -> Result<(), LognetError> {
        validate_inputs(&self.settings, features, labels, weights, penalties)?;

        let (coef_path, intercept_path) =
            fit_path(&self.settings, features, labels, weights, penalties)?;

        let cv_scores = cross_validate(&self.settings, features, labels, weights, penalties)?;
        let mut best = 0;
        for (i, &score) in cv_scores.iter().enumerate() {
            if score > cv_scores[best] {
                best = i;
            }
        }
        log::info!(
            "Penalized logistic path fit: {} features, {} lambdas, best CV index {} ({} = {:.4})",
            features.ncols(),
            self.settings.lambda_path.len(),
            best,
            self.settings.scorer,
            cv_scores[best]
        );

        self.coef_path = coef_path;
        self.intercept_path = intercept_path;
        self.cv_scores = cv_scores;
        self.best = Some(best);
        Ok(())
    }

    fn coef_path(&self) -> ArrayView2<'_, f64> {
        self.coef_path.view()
    }

    fn intercept_path(&self) -> ArrayView1<'_, f64> {
        self.intercept_path.view()
    }

    fn best_index(&self) -> Result<usize, LognetError> {
        self.best.ok_or(LognetError::NotFitted)
    }

    fn n_lambda(&self) -> usize {
        self.settings.lambda_path.len()
    }
}

fn validate_inputs(
    settings: &LognetSettings,
    features: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    penalties: ArrayView1<f64>,
) -> Result<(), LognetError> {
    if !(0.0..=1.0).contains(&settings.alpha) {
        return Err(LognetError::InvalidAlpha(settings.alpha));
    }
    if settings.n_folds < 3 {
        return Err(LognetError::TooFewFolds(settings.n_folds));
    }
    let path = &settings.lambda_path;
    if path.is_empty() || path.iter().any(|&l| !l.is_finite() || l <= 0.0) {
        return Err(LognetError::InvalidLambdaPath);
    }
    for t in 1..path.len() {
        if path[t] >= path[t - 1] {
            return Err(LognetError::InvalidLambdaPath);
        }
    }

    let n = features.nrows();
    if labels.len() != n {
        return Err(LognetError::ShapeMismatch {
            rows: n,
            labels: labels.len(),
        });
    }
    if weights.len() != n {
        return Err(LognetError::WeightLength {
            weights: weights.len(),
            expected: n,
        });
    }
    if penalties.len() != features.ncols() {
        return Err(LognetError::PenaltyLength {
            penalties: penalties.len(),
            expected: features.ncols(),
        });
    }

    let mut n_presence = 0usize;
    let mut n_background = 0usize;
    for (row, &y) in labels.iter().enumerate() {
        if y == 1.0 {
            n_presence += 1;
        } else if y == 0.0 {
            n_background += 1;
        } else {
            return Err(LognetError::NonBinaryLabel { row, value: y });
        }
    }
    if n_presence == 0 || n_background == 0 {
        return Err(LognetError::SingleClass);
    }
    if n_presence < settings.n_folds {
        return Err(LognetError::ClassSmallerThanFolds {
            class: "presence",
            count: n_presence,
            folds: settings.n_folds,
        });
    }
    if n_background < settings.n_folds {
        return Err(LognetError::ClassSmallerThanFolds {
            class: "background",
            count: n_background,
            folds: settings.n_folds,
        });
    }

    for (row, &w) in weights.iter().enumerate() {
        if !w.is_finite() || w < 0.0 {
            return Err(LognetError::InvalidWeight { row, value: w });
        }
    }
    if weights.sum() <= 0.0 {
        return Err(LognetError::ZeroWeightSum);
    }
    for (index, &v) in penalties.iter().enumerate() {
        if !v.is_finite() || v < 0.0 {
            return Err(LognetError::InvalidPenalty { index, value: v });
        }
    }
    for ((row, col), &v) in features.indexed_iter() {
        if !v.is_finite() {
            return Err(LognetError::NonFiniteFeature { row, col });
        }
    }
    Ok(())
}

/// Fits the whole lambda path on one dataset and returns
/// (coefficients `[p, m]`, intercepts `[m]`), both on the original scale.
fn fit_path(
    settings: &LognetSettings,
    features: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    penalties: ArrayView1<f64>,
) -> Result<(Array2<f64>, Array1<f64>), LognetError> {
    let p = features.ncols();
    let m = settings.lambda_path.len();

    // Normalized prior weights put lambda on the glmnet scale.
    let total = weights.sum();
    let prior = weights.mapv(|w| w / total);

    let standardized = if settings.standardize {
        Some(standardize_columns(features, &prior, settings.fit_intercept))
    } else {
        None
    };
    let z = match &standardized {
        Some((zs, _, _)) => zs.view(),
        None => features.reborrow(),
    };

    let mut coef_path = Array2::zeros((p, m));
    let mut intercept_path = Array1::zeros(m);
    let mut beta: Array1<f64> = Array1::zeros(p);
    let mut beta0 = if settings.fit_intercept {
        let y_bar: f64 = Zip::from(&prior).and(labels).fold(0.0, |acc, &w, &y| acc + w * y);
        let y_bar = y_bar.clamp(PROB_EPS, 1.0 - PROB_EPS);
        (y_bar / (1.0 - y_bar)).ln()
    } else {
        0.0
    };

    for (t, &lambda) in settings.lambda_path.iter().enumerate() {
        let mut converged = false;
        for _ in 0..settings.max_iterations {
            let eta = z.dot(&beta) + beta0;
            let (irls_weights, mut residual) = working_residual(labels, &eta);
            let ws = &prior * &irls_weights;
            let ws_sum = ws.sum();

            let beta_before = beta.clone();
            let beta0_before = beta0;

            // Cyclic coordinate descent on the fixed quadratic approximation.
            for _ in 0..MAX_CD_SWEEPS {
                let mut max_delta: f64 = 0.0;

                if settings.fit_intercept {
                    let delta0 =
                        Zip::from(&ws).and(&residual).fold(0.0, |acc, &w, &r| acc + w * r)
                            / ws_sum;
                    if delta0 != 0.0 {
                        beta0 += delta0;
                        residual.mapv_inplace(|r| r - delta0);
                        max_delta = max_delta.max(delta0.abs());
                    }
                }

                for j in 0..p {
                    let col = z.column(j);
                    let old = beta[j];
                    let mut rho = 0.0;
                    let mut denom = 0.0;
                    Zip::from(col).and(&ws).and(&residual).for_each(|&x, &w, &r| {
                        rho += w * x * (r + x * old);
                        denom += w * x * x;
                    });
                    let l1 = lambda * penalties[j] * settings.alpha;
                    let l2 = lambda * penalties[j] * (1.0 - settings.alpha);
                    let new = if denom + l2 > 0.0 {
                        soft_threshold(rho, l1) / (denom + l2)
                    } else {
                        0.0
                    };
                    if new != old {
                        let delta = new - old;
                        Zip::from(&mut residual).and(col).for_each(|r, &x| *r -= delta * x);
                        beta[j] = new;
                        max_delta = max_delta.max(delta.abs());
                    }
                }

                if max_delta < settings.tolerance {
                    break;
                }
            }

            if !beta.iter().all(|b| b.is_finite()) || !beta0.is_finite() {
                return Err(LognetError::Diverged { index: t });
            }

            let change = Zip::from(&beta)
                .and(&beta_before)
                .fold(0.0f64, |acc, &a, &b| acc.max((a - b).abs()))
                .max((beta0 - beta0_before).abs());
            if change < settings.tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!(
                "Coordinate descent did not fully converge at lambda index {t} \
                 (lambda = {lambda:.6e}); keeping the last iterate"
            );
        }
        coef_path.column_mut(t).assign(&beta);
        intercept_path[t] = beta0;
    }

    if let Some((_, means, sds)) = &standardized {
        for t in 0..m {
            let mut shift = 0.0;
            for j in 0..p {
                let b = coef_path[[j, t]] / sds[j];
                shift += b * means[j];
                coef_path[[j, t]] = b;
            }
            intercept_path[t] -= shift;
        }
    }

    Ok((coef_path, intercept_path))
}

/// IRLS variance weights and working residual `(y - mu) / w` at the current
/// linear predictor. Probabilities are clamped away from 0/1 and the weights
/// floored, following standard penalized-GLM practice.
fn working_residual(y: ArrayView1<f64>, eta: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
    let mut mu = eta.mapv(|e| 1.0 / (1.0 + (-e.clamp(-ETA_CLAMP, ETA_CLAMP)).exp()));
    mu.mapv_inplace(|v| v.clamp(PROB_EPS, 1.0 - PROB_EPS));
    let weights = mu.mapv(|v| (v * (1.0 - v)).max(MIN_WEIGHT));
    let residual = Zip::from(y)
        .and(&mu)
        .and(&weights)
        .map_collect(|&yi, &mi, &wi| (yi - mi) / wi);
    (weights, residual)
}

fn soft_threshold(x: f64, threshold: f64) -> f64 {
    x.signum() * (x.abs() - threshold).max(0.0)
}

/// Weighted column standardization. Centering is skipped without an intercept
/// since nothing could absorb the shift.
fn standardize_columns(
    features: ArrayView2<f64>,
    prior: &Array1<f64>,
    center: bool,
) -> (Array2<f64>, Array1<f64>, Array1<f64>) {
    let p = features.ncols();
    let mut means = Array1::zeros(p);
    let mut sds = Array1::zeros(p);
    let mut out = features.to_owned();
    for j in 0..p {
        let col = features.column(j);
        let mean = if center {
            Zip::from(col).and(prior).fold(0.0, |acc, &x, &w| acc + w * x)
        } else {
            0.0
        };
        let variance =
            Zip::from(col).and(prior).fold(0.0, |acc, &x, &w| acc + w * (x - mean) * (x - mean));
        let sd = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        means[j] = mean;
        sds[j] = sd;
        out.column_mut(j).mapv_inplace(|x| (x - mean) / sd);
    }
    (out, means, sds)
}

/// Deterministic stratified fold assignment: presence and background rows are
/// dealt round-robin to folds in table order. Returns held-out indices per fold.
fn stratified_folds(labels: ArrayView1<f64>, n_folds: usize) -> Vec<Vec<usize>> {
    let mut folds = vec![Vec::new(); n_folds];
    let mut presence_seen = 0usize;
    let mut background_seen = 0usize;
    for (i, &y) in labels.iter().enumerate() {
        if y == 1.0 {
            folds[presence_seen % n_folds].push(i);
            presence_seen += 1;
        } else {
            folds[background_seen % n_folds].push(i);
            background_seen += 1;
        }
    }
    folds
}

/// Refits the path on each fold's training rows and scores every lambda on the
/// held-out rows. Returns the mean score per lambda.
fn cross_validate(
    settings: &LognetSettings,
    features: ArrayView2<f64>,
    labels: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    penalties: ArrayView1<f64>,
) -> Result<Array1<f64>, LognetError> {
    let n = features.nrows();
    let m = settings.lambda_path.len();
    let folds = stratified_folds(labels, settings.n_folds);

    let run_fold = |test: &Vec<usize>| -> Result<Array1<f64>, LognetError> {
        let mut held_out = vec![false; n];
        for &i in test {
            held_out[i] = true;
        }
        let train: Vec<usize> = (0..n).filter(|&i| !held_out[i]).collect();

        let z_train = features.select(Axis(0), &train);
        let y_train = labels.select(Axis(0), &train);
        let w_train = weights.select(Axis(0), &train);
        let (coefs, intercepts) = fit_path(
            settings,
            z_train.view(),
            y_train.view(),
            w_train.view(),
            penalties,
        )?;

        let z_test = features.select(Axis(0), test);
        let y_test = labels.select(Axis(0), test);
        let w_test = weights.select(Axis(0), test);
        let mut scores = Array1::zeros(m);
        for t in 0..m {
            let eta = z_test.dot(&coefs.column(t)) + intercepts[t];
            let probs = eta.mapv(|e| 1.0 / (1.0 + (-e.clamp(-ETA_CLAMP, ETA_CLAMP)).exp()));
            scores[t] = settings
                .scorer
                .score(y_test.view(), probs.view(), Some(w_test.view()));
        }
        Ok(scores)
    };

    let fold_scores: Vec<Array1<f64>> = if settings.n_jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.n_jobs)
            .build()
            .map_err(|e| LognetError::ThreadPool(e.to_string()))?;
        pool.install(|| folds.par_iter().map(run_fold).collect::<Result<_, _>>())?
    } else {
        folds.iter().map(run_fold).collect::<Result<_, _>>()?
    };

    let mut mean = Array1::zeros(m);
    for scores in &fold_scores {
        mean += scores;
    }
    mean /= fold_scores.len() as f64;
    Ok(mean)
}
