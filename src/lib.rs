pub mod data;
pub mod features;
pub mod lognet;
pub mod metrics;
pub mod model;
pub mod regularize;

pub use data::{CovariateColumn, CovariateKind, Covariates, load_presence_background};
pub use model::{LambdaSelect, MaxentConfig, MaxentModel, Transform};
