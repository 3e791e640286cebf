//! # Maxent Estimator
//!
//! [`MaxentModel`] ties the pipeline together: derive features from a
//! presence/background covariate table, weight the samples, build the lambda
//! path, drive the penalized logistic path solver, select one coefficient
//! vector, and attach the entropy correction that calibrates the logistic and
//! cloglog output scales. The fitted state (feature-derivation state,
//! coefficients, entropy) is everything prediction needs, and is what
//! `save`/`load` persist; the solver handle is kept in memory but never
//! serialized.
//!
//! Prediction clamps derived features to their training-observed ranges before
//! computing the linear predictor, so out-of-range covariates saturate instead
//! of extrapolating.

use crate::data::Covariates;
use crate::features::{ConfigError, FeatureError, FeatureLabel, FeatureType, MaxentFeatures};
use crate::lognet::{Lognet, LognetError, LognetSettings, PathSolver};
use crate::metrics::Scorer;
use crate::regularize::{self, DEFAULT_N_LAMBDAS, RegularizationScales, RegularizeError};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Version tag written into every persisted model file.
pub const SCHEMA_VERSION: u32 = 1;

/// Output scale of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// The bare linear predictor.
    Raw,
    /// `exp(link)`, the unnormalized Maxent density.
    Exponential,
    /// `1 / (1 + exp(-entropy - link))`, the calibrated suitability in (0, 1).
    Logistic,
    /// `1 - exp(-exp(entropy + link))`, the complementary log-log scale.
    Cloglog,
}

impl FromStr for Transform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "exponential" => Ok(Self::Exponential),
            "logistic" => Ok(Self::Logistic),
            "cloglog" => Ok(Self::Cloglog),
            other => Err(ConfigError::UnknownTransform(other.to_string())),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Raw => "raw",
            Self::Exponential => "exponential",
            Self::Logistic => "logistic",
            Self::Cloglog => "cloglog",
        };
        f.write_str(name)
    }
}

/// Which lambda's coefficients the estimator keeps after the path fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LambdaSelect {
    /// The lambda with the highest cross-validated score.
    Best,
    /// The final, least-regularized lambda on the path.
    Last,
}

impl FromStr for LambdaSelect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "best" => Ok(Self::Best),
            "last" => Ok(Self::Last),
            other => Err(ConfigError::UnknownLambdaSelect(other.to_string())),
        }
    }
}

impl fmt::Display for LambdaSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Best => "best",
            Self::Last => "last",
        })
    }
}

/// Estimator configuration, immutable for the lifetime of a model.
///
/// The defaults reproduce the standard Maxent setup: linear + hinge + product
/// features, unit beta multipliers, feature clamping, ROC AUC scoring, and the
/// final path lambda.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxentConfig {
    pub feature_types: Vec<FeatureType>,
    /// Global scale on every regularization penalty.
    pub beta_multiplier: f64,
    /// Per-family scales: linear/quadratic/product, hinge, threshold, categorical.
    pub beta_lqp: f64,
    pub beta_hinge: f64,
    pub beta_threshold: f64,
    pub beta_categorical: f64,
    /// Hinge knots per continuous covariate.
    pub n_hinge_features: usize,
    /// Threshold cut points per continuous covariate.
    pub n_threshold_features: usize,
    /// Clamp derived features to their training range at prediction time.
    pub clamp: bool,
    pub scorer: Scorer,
    pub use_lambdas: LambdaSelect,
    /// Worker threads for cross-validation inside the solver.
    pub n_jobs: usize,
}

impl Default for MaxentConfig {
    fn default() -> Self {
        Self {
            feature_types: vec![FeatureType::Linear, FeatureType::Hinge, FeatureType::Product],
            beta_multiplier: 1.0,
            beta_lqp: 1.0,
            beta_hinge: 1.0,
            beta_threshold: 1.0,
            beta_categorical: 1.0,
            n_hinge_features: 50,
            n_threshold_features: 50,
            clamp: true,
            scorer: Scorer::RocAuc,
            use_lambdas: LambdaSelect::Last,
            n_jobs: num_cpus::get(),
        }
    }
}

impl MaxentConfig {
    /// Checks the configuration for values that can never produce a valid fit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feature_types.is_empty() {
            return Err(ConfigError::EmptyFeatureSet);
        }
        let betas = [
            ("beta_multiplier", self.beta_multiplier),
            ("beta_lqp", self.beta_lqp),
            ("beta_hinge", self.beta_hinge),
            ("beta_threshold", self.beta_threshold),
            ("beta_categorical", self.beta_categorical),
        ];
        for (name, value) in betas {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidHyperparameter {
                    name,
                    requirement: "a finite non-negative number",
                    value: value.to_string(),
                });
            }
        }
        if self.feature_types.contains(&FeatureType::Hinge) && self.n_hinge_features < 2 {
            return Err(ConfigError::InvalidHyperparameter {
                name: "n_hinge_features",
                requirement: "at least 2 when hinge features are requested",
                value: self.n_hinge_features.to_string(),
            });
        }
        if self.feature_types.contains(&FeatureType::Threshold) && self.n_threshold_features < 1 {
            return Err(ConfigError::InvalidHyperparameter {
                name: "n_threshold_features",
                requirement: "at least 1 when threshold features are requested",
                value: self.n_threshold_features.to_string(),
            });
        }
        if self.n_jobs < 1 {
            return Err(ConfigError::InvalidHyperparameter {
                name: "n_jobs",
                requirement: "at least 1",
                value: self.n_jobs.to_string(),
            });
        }
        Ok(())
    }
}

/// Errors raised during [`MaxentModel::fit`].
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("labels have length {labels} but the covariate table has {rows} rows")]
    LabelLength { labels: usize, rows: usize },

    #[error("labels must be exactly 0 or 1; found {value} at row {row}")]
    NonBinaryLabel { row: usize, value: f64 },

    #[error("the training data contains no presence rows (label 1)")]
    NoPresence,

    #[error("the training data contains no background rows (label 0)")]
    NoBackground,

    #[error("background raw predictions sum to {0}; the entropy correction is undefined")]
    DegenerateEntropy(f64),

    #[error("feature derivation failed: {0}")]
    Feature(#[from] FeatureError),

    #[error("regularization failed: {0}")]
    Regularize(#[from] RegularizeError),

    #[error("the path solver failed: {0}")]
    Solver(#[from] LognetError),
}

/// Errors raised during prediction.
#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("the model has not been fitted")]
    NotFitted,

    #[error("feature matrix has {found} columns but the model was fitted with {expected}")]
    FeatureCountMismatch { expected: usize, found: usize },

    #[error("feature derivation failed: {0}")]
    Feature(#[from] FeatureError),
}

/// Errors raised while saving or loading a model file.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("failed to read or write the model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse the model file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize the model: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("model file schema version {found} is not supported (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("model file carries an invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Everything a fitted model needs to predict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fit {
    /// Entropy of the normalized exponential background predictions.
    pub entropy: f64,
    /// One coefficient per derived feature column.
    pub coefficients: Array1<f64>,
    /// Feature-derivation state recorded at fitting time.
    pub features: MaxentFeatures,
}

/// Lifecycle of the estimator.
#[derive(Debug, Clone)]
pub enum FitState {
    Unfitted,
    Fitted(Fit),
}

/// The Maxent species distribution estimator.
#[derive(Debug)]
pub struct MaxentModel {
    config: MaxentConfig,
    state: FitState,
    solver: Option<Box<dyn PathSolver>>,
    /// True when the solver was supplied by the caller. An injected solver is
    /// reused across refits; the default one is rebuilt every fit because its
    /// lambda path depends on the data.
    solver_injected: bool,
}

impl Default for MaxentModel {
    fn default() -> Self {
        Self {
            config: MaxentConfig::default(),
            state: FitState::Unfitted,
            solver: None,
            solver_injected: false,
        }
    }
}

impl MaxentModel {
    pub fn new(config: MaxentConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: FitState::Unfitted,
            solver: None,
            solver_injected: false,
        })
    }

    /// Builds a model around a caller-supplied solver instead of the default
    /// coordinate-descent path fit. The injected solver is kept across refits;
    /// useful for exercising selection logic against a deterministic path.
    pub fn with_solver(
        config: MaxentConfig,
        solver: Box<dyn PathSolver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: FitState::Unfitted,
            solver: Some(solver),
            solver_injected: true,
        })
    }

    pub fn config(&self) -> &MaxentConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state, FitState::Fitted(_))
    }

    /// Entropy correction of the fitted model, if any.
    pub fn entropy(&self) -> Option<f64> {
        match &self.state {
            FitState::Fitted(fit) => Some(fit.entropy),
            FitState::Unfitted => None,
        }
    }

    /// Selected coefficients, one per derived feature column.
    pub fn coefficients(&self) -> Option<ArrayView1<'_, f64>> {
        match &self.state {
            FitState::Fitted(fit) => Some(fit.coefficients.view()),
            FitState::Unfitted => None,
        }
    }

    /// Labels describing each derived feature column of the fitted model.
    pub fn feature_labels(&self) -> Option<&[FeatureLabel]> {
        match &self.state {
            FitState::Fitted(fit) => Some(fit.features.labels()),
            FitState::Unfitted => None,
        }
    }

    /// Fits the model to a presence/background sample.
    ///
    /// `y` holds one label per covariate row: 1 for presence, 0 for background.
    /// On any error the previous fitted state (if any) is left untouched.
    pub fn fit(&mut self, x: &Covariates, y: ArrayView1<f64>) -> Result<(), EstimationError> {
        let n = x.n_samples();
        if y.len() != n {
            return Err(EstimationError::LabelLength {
                labels: y.len(),
                rows: n,
            });
        }
        let mut n_presence = 0usize;
        let mut n_background = 0usize;
        for (row, &value) in y.iter().enumerate() {
            if value == 1.0 {
                n_presence += 1;
            } else if value == 0.0 {
                n_background += 1;
            } else {
                return Err(EstimationError::NonBinaryLabel { row, value });
            }
        }
        if n_presence == 0 {
            return Err(EstimationError::NoPresence);
        }
        if n_background == 0 {
            return Err(EstimationError::NoBackground);
        }
        log::info!(
            "Fitting Maxent model: {} samples ({} presence, {} background), {} covariates",
            n,
            n_presence,
            n_background,
            x.n_covariates()
        );

        let mut features = MaxentFeatures::new(
            self.config.feature_types.clone(),
            self.config.n_hinge_features,
            self.config.n_threshold_features,
        );
        let z = features.fit_transform(x)?;
        log::info!(
            "Derived {} feature columns from {} covariates",
            z.ncols(),
            x.n_covariates()
        );

        let weights = regularize::compute_weights(y);
        let scales = RegularizationScales {
            beta_multiplier: self.config.beta_multiplier,
            beta_lqp: self.config.beta_lqp,
            beta_hinge: self.config.beta_hinge,
            beta_threshold: self.config.beta_threshold,
            beta_categorical: self.config.beta_categorical,
        };
        let penalties = regularize::compute_regularization(y, z.view(), features.labels(), &scales)?;
        let lambdas = regularize::compute_lambdas(y, weights.view(), penalties.view(), DEFAULT_N_LAMBDAS)?;

        // A solver injected at construction survives refits; otherwise a fresh
        // one is built because the lambda path depends on the data.
        let mut solver: Box<dyn PathSolver> = match self.solver.take() {
            Some(solver) if self.solver_injected => solver,
            _ => Box::new(Lognet::new(LognetSettings::new(
                lambdas,
                self.config.scorer,
                self.config.n_jobs,
            ))),
        };
        let outcome = fit_with_solver(&self.config, solver.as_mut(), features, &z, y, &weights, &penalties);
        self.solver = Some(solver);
        self.state = FitState::Fitted(outcome?);
        Ok(())
    }

    /// Predicts suitability for new covariate rows on the requested scale.
    pub fn predict(
        &self,
        x: &Covariates,
        transform: Transform,
    ) -> Result<Array1<f64>, PredictionError> {
        let fit = self.fitted()?;
        let z = fit.features.transform(x)?;
        apply_transform(&self.config, fit, z.view(), transform)
    }

    /// Predicts from an already-derived feature matrix, skipping derivation.
    /// Columns must line up with the fitted feature layout.
    pub fn predict_features(
        &self,
        z: ArrayView2<f64>,
        transform: Transform,
    ) -> Result<Array1<f64>, PredictionError> {
        let fit = self.fitted()?;
        apply_transform(&self.config, fit, z, transform)
    }

    fn fitted(&self) -> Result<&Fit, PredictionError> {
        match &self.state {
            FitState::Fitted(fit) => Ok(fit),
            FitState::Unfitted => Err(PredictionError::NotFitted),
        }
    }

    /// Writes the model (configuration plus fitted state) as TOML, gzipped
    /// when `compress` is set.
    pub fn save(&self, path: impl AsRef<Path>, compress: bool) -> Result<(), PersistError> {
        let saved = SavedModel {
            schema_version: SCHEMA_VERSION,
            config: self.config.clone(),
            fit: match &self.state {
                FitState::Fitted(fit) => Some(fit.clone()),
                FitState::Unfitted => None,
            },
        };
        let toml_string = toml::to_string_pretty(&saved)?;
        let file = fs::File::create(path)?;
        if compress {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            encoder.write_all(toml_string.as_bytes())?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            writer.write_all(toml_string.as_bytes())?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Reads a model written by [`save`](Self::save). The solver handle is not
    /// persisted, so a loaded model predicts but keeps no path to re-select
    /// from.
    pub fn load(path: impl AsRef<Path>, compressed: bool) -> Result<Self, PersistError> {
        let file = fs::File::open(path)?;
        let mut toml_string = String::new();
        if compressed {
            GzDecoder::new(BufReader::new(file)).read_to_string(&mut toml_string)?;
        } else {
            BufReader::new(file).read_to_string(&mut toml_string)?;
        }
        let saved: SavedModel = toml::from_str(&toml_string)?;
        if saved.schema_version != SCHEMA_VERSION {
            return Err(PersistError::SchemaVersion {
                found: saved.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        saved.config.validate()?;
        Ok(Self {
            config: saved.config,
            state: match saved.fit {
                Some(fit) => FitState::Fitted(fit),
                None => FitState::Unfitted,
            },
            solver: None,
            solver_injected: false,
        })
    }
}

/// On-disk layout of a persisted model.
#[derive(Debug, Serialize, Deserialize)]
struct SavedModel {
    schema_version: u32,
    config: MaxentConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fit: Option<Fit>,
}

/// Runs the solver and condenses its path into a [`Fit`]: one coefficient
/// vector chosen by the configured policy plus the entropy correction.
fn fit_with_solver(
    config: &MaxentConfig,
    solver: &mut dyn PathSolver,
    features: MaxentFeatures,
    z: &Array2<f64>,
    y: ArrayView1<f64>,
    weights: &Array1<f64>,
    penalties: &Array1<f64>,
) -> Result<Fit, EstimationError> {
    solver.fit(z.view(), y, weights.view(), penalties.view())?;

    let coef_path = solver.coef_path();
    assert!(coef_path.ncols() > 0, "solver returned an empty coefficient path");
    let index = match config.use_lambdas {
        LambdaSelect::Last => coef_path.ncols() - 1,
        LambdaSelect::Best => solver.best_index()?,
    };
    let coefficients = coef_path.column(index).to_owned();
    let nonzero = coefficients.iter().filter(|&&b| b != 0.0).count();
    log::info!(
        "Selected lambda index {} via '{}' policy ({} of {} coefficients nonzero)",
        index,
        config.use_lambdas,
        nonzero,
        coefficients.len()
    );

    // Entropy of the normalized exponential background predictions, computed
    // once here and fixed for the lifetime of the fit.
    let mut raw = Vec::new();
    for (row, &label) in y.iter().enumerate() {
        if label == 0.0 {
            let link = z.row(row).dot(&coefficients);
            raw.push(link.exp());
        }
    }
    let total: f64 = raw.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(EstimationError::DegenerateEntropy(total));
    }
    let entropy = raw
        .iter()
        .filter(|&&r| r > 0.0)
        .map(|&r| {
            let p = r / total;
            -(p * p.ln())
        })
        .sum::<f64>();
    log::info!("Entropy correction H = {:.6} over {} background rows", entropy, raw.len());

    Ok(Fit {
        entropy,
        coefficients,
        features,
    })
}

/// Shared prediction tail: validate width, clamp if configured, form the link,
/// and map it onto the requested output scale.
fn apply_transform(
    config: &MaxentConfig,
    fit: &Fit,
    z: ArrayView2<f64>,
    transform: Transform,
) -> Result<Array1<f64>, PredictionError> {
    if z.ncols() != fit.coefficients.len() {
        return Err(PredictionError::FeatureCountMismatch {
            expected: fit.coefficients.len(),
            found: z.ncols(),
        });
    }
    let link = if config.clamp {
        fit.features.clamp_features(z).dot(&fit.coefficients)
    } else {
        z.dot(&fit.coefficients)
    };
    let entropy = fit.entropy;
    Ok(match transform {
        Transform::Raw => link,
        Transform::Exponential => link.mapv(f64::exp),
        Transform::Logistic => link.mapv(|l| 1.0 / (1.0 + (-entropy - l).exp())),
        Transform::Cloglog => link.mapv(|l| 1.0 - (-((entropy + l).exp())).exp()),
    })
}
