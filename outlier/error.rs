//! # Error Types
//!
//! Every operation in the aggregation and fusion core fails synchronously with an
//! `OutlierError`. The variants mirror the failure classes a caller can act on:
//! bad configuration, a missing feature column, too little data, or a join that
//! would silently change the number of DNA-side rows. Messages always carry the
//! offending column name or entity key so the problem can be located directly
//! in the exported tables.

use thiserror::Error;

/// Errors raised while building, fusing, filtering or scoring result tables.
#[derive(Error, Debug)]
pub enum OutlierError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Feature column '{column}' was not found in the {context} table.")]
    FeatureMismatch { column: String, context: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error(
        "Join integrity violated while {operation}: expected {expected} rows, found {found}. Offending key: {key}"
    )]
    JoinIntegrity {
        operation: String,
        expected: usize,
        found: usize,
        key: String,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Malformed junction identifier '{0}'. Expected 'chrom:start-end:strand'.")]
    InvalidJunction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("Failed to parse delimited record: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Ensemble model error: {0}")]
    Model(#[from] ModelError),
}

/// Errors raised while fitting, saving or loading an ensemble model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("A linear system solve failed. The penalized Hessian may be singular. Error: {0}")]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),
    #[error("Non-finite value in feature '{0}'. Rows with missing features must be removed before fitting.")]
    NonFiniteFeature(String),
    #[error("Label vector has {labels} entries but the feature matrix has {rows} rows.")]
    LabelLengthMismatch { labels: usize, rows: usize },
    #[error("Model expects {expected} features but the matrix has {found} columns.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Logistic fit did not converge within {max_iterations} iterations. Last step size {last_step:.3e}.")]
    DidNotConverge { max_iterations: usize, last_step: f64 },
}

pub type Result<T> = std::result::Result<T, OutlierError>;
