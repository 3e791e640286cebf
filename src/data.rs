//! # Covariate Tables and Sample Loading
//!
//! This module is the entry point for user-provided occurrence data. It defines
//! the `Covariates` container consumed by the rest of the crate and a strict
//! loader for presence/background CSV files.
//!
//! - Kind-tagged columns: every covariate is declared `Continuous` or
//!   `Categorical` up front. Categorical columns carry integer level codes and
//!   are one-hot expanded downstream; guessing kinds from the data is a class
//!   of silent error this crate refuses to have.
//! - User-centric errors: loader failures name the offending column and row.
//! - Byte-stream friendly: files ending in `.gz` are transparently
//!   gzip-decoded, matching the common distribution format for sample data.

use flate2::read::GzDecoder;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// How a covariate column is interpreted during feature derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovariateKind {
    /// A real-valued environmental measurement (temperature, elevation, ...).
    Continuous,
    /// An integer-coded class membership (ecoregion, soil type, ...).
    Categorical,
}

/// Name and kind of a single covariate column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovariateColumn {
    pub name: String,
    pub kind: CovariateKind,
}

impl CovariateColumn {
    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CovariateKind::Continuous,
        }
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CovariateKind::Categorical,
        }
    }
}

/// A validated table of raw covariates: one row per sample location, one
/// kind-tagged column per environmental variable.
///
/// All values are finite `f64`; categorical columns hold integer level codes
/// stored as `f64`. Construction is the only place this is checked, so the
/// feature-derivation code can assume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covariates {
    values: Array2<f64>,
    columns: Vec<CovariateColumn>,
}

/// A comprehensive error type for data loading and table validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("the required column '{0}' was not found in the input file")]
    ColumnNotFound(String),

    #[error("column '{column}' contains the non-numeric value '{value}' at data row {row}")]
    NotNumeric {
        column: String,
        row: usize,
        value: String,
    },

    #[error("column '{column}' contains a non-finite value at data row {row}; all covariate data must be finite")]
    NonFiniteValue { column: String, row: usize },

    #[error("presence column value at data row {row} is {value}; presence must be exactly 0 (background) or 1 (presence)")]
    NonBinaryPresence { row: usize, value: f64 },

    #[error("the input table contains no data rows")]
    EmptyTable,

    #[error("{columns} column descriptors were supplied for a table with {width} columns")]
    ColumnCountMismatch { columns: usize, width: usize },

    #[error("the covariate column name '{0}' appears more than once")]
    DuplicateColumn(String),
}

impl Covariates {
    /// Builds a covariate table from a matrix and per-column descriptors.
    ///
    /// Fails if the descriptor count does not match the matrix width, if any
    /// column name repeats, or if any value is non-finite.
    pub fn new(values: Array2<f64>, columns: Vec<CovariateColumn>) -> Result<Self, DataError> {
        if columns.len() != values.ncols() {
            return Err(DataError::ColumnCountMismatch {
                columns: columns.len(),
                width: values.ncols(),
            });
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(DataError::DuplicateColumn(col.name.clone()));
            }
        }
        for (j, col) in columns.iter().enumerate() {
            if let Some(row) = values.column(j).iter().position(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValue {
                    column: col.name.clone(),
                    row,
                });
            }
        }
        Ok(Self { values, columns })
    }

    /// Convenience constructor for an all-continuous table.
    pub fn continuous(values: Array2<f64>, names: &[&str]) -> Result<Self, DataError> {
        let columns = names
            .iter()
            .map(|n| CovariateColumn::continuous(*n))
            .collect();
        Self::new(values, columns)
    }

    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_covariates(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn column(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.column(index)
    }

    pub fn columns(&self) -> &[CovariateColumn] {
        &self.columns
    }
}

/// Loads a presence/background sample table from a headered CSV file.
///
/// The column named `presence_column` becomes the response (its values must be
/// exactly 0 or 1); every other column becomes a covariate in file order, with
/// the columns named in `categorical_columns` tagged [`CovariateKind::Categorical`].
/// Paths ending in `.gz` are gzip-decoded before parsing.
pub fn load_presence_background(
    path: impl AsRef<Path>,
    presence_column: &str,
    categorical_columns: &[&str],
) -> Result<(Covariates, Array1<f64>), DataError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let presence_index = headers
        .iter()
        .position(|h| h == presence_column)
        .ok_or_else(|| DataError::ColumnNotFound(presence_column.to_string()))?;
    for &name in categorical_columns {
        if !headers.iter().any(|h| h == name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
    }

    let columns: Vec<CovariateColumn> = headers
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != presence_index)
        .map(|(_, name)| {
            if categorical_columns.contains(&name.as_str()) {
                CovariateColumn::categorical(name.clone())
            } else {
                CovariateColumn::continuous(name.clone())
            }
        })
        .collect();

    let mut labels = Vec::new();
    let mut buffer = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        for (i, cell) in record.iter().enumerate() {
            let value: f64 = cell.trim().parse().map_err(|_| DataError::NotNumeric {
                column: headers[i].clone(),
                row,
                value: cell.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DataError::NonFiniteValue {
                    column: headers[i].clone(),
                    row,
                });
            }
            if i == presence_index {
                if value != 0.0 && value != 1.0 {
                    return Err(DataError::NonBinaryPresence { row, value });
                }
                labels.push(value);
            } else {
                buffer.push(value);
            }
        }
    }
    if labels.is_empty() {
        return Err(DataError::EmptyTable);
    }

    let n_rows = labels.len();
    let n_cols = columns.len();
    let values = Array2::from_shape_vec((n_rows, n_cols), buffer)
        .expect("row-major buffer dimensions are consistent by construction");
    let covariates = Covariates::new(values, columns)?;
    log::info!(
        "Loaded {} samples ({} presence) with {} covariates from '{}'",
        n_rows,
        labels.iter().filter(|&&v| v == 1.0).count(),
        n_cols,
        path.display()
    );
    Ok((covariates, Array1::from_vec(labels)))
}
