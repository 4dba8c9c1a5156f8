//! Error and warning types for FIA estimation
//!
//! Structural problems (no evaluation, missing columns, unparsable domain
//! expressions) are `FiaError`s and abort the estimate. Statistical quality
//! issues are `EstimationWarning`s: they are logged and attached to the result.

use std::fmt;

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum FiaError {
    #[error("no evaluation selected: call select_evalids/clip_most_recent or set most_recent = true")]
    NoEvaluationSelected,

    #[error("{estimator}: missing required column(s) {columns:?} in table {table}")]
    MissingColumn {
        estimator: String,
        table: String,
        columns: Vec<String>,
    },

    #[error("{estimator}: table {table} is not available from the data source")]
    MissingTable { estimator: String, table: String },

    #[error("invalid domain expression '{expression}': {reason}")]
    DomainExpression { expression: String, reason: String },

    #[error("invalid EVALID '{0}': expected a 6-digit SSYYTT code")]
    InvalidEvalId(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("evaluations {first} and {second} both assign plot {plt_cn}; estimates would double count")]
    IncompatibleEvaluations {
        first: String,
        second: String,
        plt_cn: String,
    },

    #[error("invalid data in {table}.{column}: {reason}")]
    InvalidData {
        table: String,
        column: String,
        reason: String,
    },

    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, FiaError>;

impl FiaError {
    pub(crate) fn missing_columns(estimator: &str, table: &str, columns: Vec<String>) -> Self {
        FiaError::MissingColumn {
            estimator: estimator.to_string(),
            table: table.to_string(),
            columns,
        }
    }

    pub(crate) fn domain(expression: &str, reason: impl Into<String>) -> Self {
        FiaError::DomainExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Non-fatal issues attached to an estimate
#[derive(Debug, Clone, PartialEq)]
pub enum EstimationWarning {
    /// Fewer than `MIN_RELIABLE_PLOTS` plots support an estimate row
    InsufficientData { group: String, n_plots: usize },

    /// Exact duplicate stratification rows were found and collapsed
    DuplicateStratification { table: String, duplicates: usize },

    /// The requested evaluation type (or EVALID) has no rows in the database
    NoMatchingEvaluation { detail: String },

    /// Evaluation chosen automatically as the most recent one
    AutoSelectedEvaluation { evalids: Vec<String> },
}

/// Plot count below which variance estimates are flagged as unreliable
pub const MIN_RELIABLE_PLOTS: usize = 10;

impl fmt::Display for EstimationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationWarning::InsufficientData { group, n_plots } => write!(
                f,
                "only {} plot(s) support estimate {}; variance is unreliable below {} plots",
                n_plots, group, MIN_RELIABLE_PLOTS
            ),
            EstimationWarning::DuplicateStratification { table, duplicates } => write!(
                f,
                "{} exact duplicate row(s) in {} were collapsed before joining",
                duplicates, table
            ),
            EstimationWarning::NoMatchingEvaluation { detail } => {
                write!(f, "no matching evaluation: {}", detail)
            }
            EstimationWarning::AutoSelectedEvaluation { evalids } => write!(
                f,
                "automatically selected most recent evaluation(s) {}",
                evalids.join(", ")
            ),
        }
    }
}

impl EstimationWarning {
    /// Log through tracing and hand the warning back for collection
    pub(crate) fn emit(self) -> Self {
        tracing::warn!("{}", self);
        self
    }
}
